use urlrelay_core::models::transfer::{
    ExtractionMode, ExtractionRequest, FileName, SendType, TransferRequest,
};
use urlrelay_core::{run_direct, run_extraction};

use super::{BotContext, Button, IncomingCallback, IncomingMessage, LinkEntity};
use crate::core::filename::safe_file_name;

/// Marks callback data produced for a plain HTTP download.
pub const DIRECT_FORMAT: &str = "direct";
const YTDL_AUDIO: &str = "ytdl_audio";
const YTDL_VIDEO: &str = "ytdl_video";
/// Callback data is capped at 64 bytes, so odd "extensions" are dropped.
const MAX_EXTENSION_LEN: usize = 10;

const CHOOSE_FORMAT: &str = "Select the desired format:";
const SOURCE_GONE: &str =
    "The message with the link is no longer available. Send the link again.";
const NO_LINK: &str = "Could not find a link in the original message.";
const QUEUED: &str = "**Queued...**";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub url: String,
    /// Name shown to the user and used for the file; also the caption.
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Direct {
        send_type: SendType,
        format: String,
        extension: String,
    },
    Extract(ExtractionMode),
}

pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    match data {
        YTDL_AUDIO => return Some(CallbackAction::Extract(ExtractionMode::Audio)),
        YTDL_VIDEO => return Some(CallbackAction::Extract(ExtractionMode::Video)),
        _ => {}
    }
    let mut parts = data.splitn(3, '=');
    let (tag, format, extension) = (parts.next()?, parts.next()?, parts.next()?);
    if tag.is_empty() {
        return None;
    }
    Some(CallbackAction::Direct {
        send_type: SendType::from_tag(tag),
        format: format.to_string(),
        extension: extension.to_string(),
    })
}

pub fn direct_callback_data(send_type: SendType, extension: &str) -> String {
    format!("{}={}={}", send_type.tag(), DIRECT_FORMAT, extension)
}

pub fn keyboard(link: &SourceLink) -> Vec<Vec<Button>> {
    let ext = callback_extension(&link.display_name);
    let direct = |label: &str, send_type| Button::new(label, direct_callback_data(send_type, &ext));
    vec![
        vec![direct("Video", SendType::Video), direct("File", SendType::Document)],
        vec![direct("Audio", SendType::Audio), direct("Video note", SendType::VideoNote)],
        vec![
            Button::new("Audio (yt-dlp)", YTDL_AUDIO),
            Button::new("Video (yt-dlp)", YTDL_VIDEO),
        ],
    ]
}

fn callback_extension(name: &str) -> String {
    let parsed = FileName::parse(name);
    let ext = parsed.extension();
    if ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext.to_ascii_lowercase()
    } else {
        String::new()
    }
}

/// Recovers the URL from a message. `url * name` overrides the display
/// name; otherwise the first link annotation wins over the raw text.
pub fn resolve_source(text: &str, entities: &[LinkEntity]) -> Option<SourceLink> {
    let text = text.trim();
    let (candidate, custom_name) = match text.split_once(" * ") {
        Some((url, name)) => (url.trim().to_string(), Some(name.trim().to_string())),
        None => {
            let from_entity = entities.iter().find_map(|e| match &e.url {
                Some(url) => Some(url.clone()),
                None => utf16_slice(text, e.offset, e.length),
            });
            let from_text = || {
                text.split_whitespace()
                    .find(|w| is_http_url(w))
                    .map(str::to_string)
            };
            (from_entity.or_else(from_text)?, None)
        }
    };

    let url = candidate.trim().to_string();
    if !is_http_url(&url) {
        return None;
    }
    let display_name = custom_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name(&url));
    Some(SourceLink { url, display_name })
}

fn is_http_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Last path segment of the URL, percent-decoded, or the host.
fn default_name(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return "file".to_string();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut s| s.rfind(|seg| !seg.is_empty()).map(str::to_string));
    match segment {
        Some(seg) => urlencoding::decode(&seg)
            .map(|s| s.into_owned())
            .unwrap_or(seg),
        None => parsed.host_str().unwrap_or("file").to_string(),
    }
}

fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    let slice = units.get(offset..end)?;
    String::from_utf16(slice).ok()
}

pub async fn offer_options(ctx: &BotContext, msg: &IncomingMessage) -> anyhow::Result<()> {
    let Some(link) = resolve_source(&msg.text, &msg.entities) else {
        return Ok(());
    };
    tracing::info!("[bot] {} sent {}", msg.user, link.url);
    ctx.api
        .send_keyboard(msg.message, CHOOSE_FORMAT, keyboard(&link))
        .await?;
    Ok(())
}

pub async fn run_callback(ctx: &BotContext, callback: IncomingCallback) -> anyhow::Result<()> {
    let Some(action) = parse_callback(&callback.data) else {
        tracing::warn!("[bot] unknown callback data {:?}", callback.data);
        return Ok(());
    };
    let Some(source) = callback.source else {
        ctx.api.edit_text(callback.message, SOURCE_GONE).await?;
        return Ok(());
    };
    let Some(link) = resolve_source(&source.text, &source.entities) else {
        ctx.api.edit_text(callback.message, NO_LINK).await?;
        return Ok(());
    };

    // Editing drops the keyboard, so a second click has nothing to press.
    ctx.api.edit_text(callback.message, QUEUED).await?;
    let _permit = ctx.limiter.clone().acquire_owned().await?;

    let outcome = match action {
        CallbackAction::Direct {
            send_type,
            extension,
            ..
        } => {
            let file_name =
                safe_file_name(&FileName::from_display(&link.display_name, &extension));
            let request = TransferRequest {
                url: link.url,
                send_type,
                file_name,
                caption: link.display_name,
                user: callback.user,
                status: callback.message,
                source: source.message,
            };
            run_direct(&ctx.transfer, request).await.map(|_| ())
        }
        CallbackAction::Extract(mode) => {
            let request = ExtractionRequest {
                url: link.url,
                mode,
                user: callback.user,
                status: callback.message,
                source: source.message,
            };
            run_extraction(&ctx.transfer, request).await.map(|_| ())
        }
    };

    if let Err(e) = outcome {
        tracing::info!("[bot] transfer for {} ended with: {}", callback.user, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::header;
    use axum::routing::get;
    use axum::Router;
    use urlrelay_core::models::media::{Attachment, Caption};
    use tokio::io::AsyncWriteExt;
    use tokio_util::io::ReaderStream;
    use urlrelay_core::models::transfer::{MessageId, MessageRef, UserId};

    use crate::models::settings::AccessSettings;

    fn link(url: &str, name: &str) -> SourceLink {
        SourceLink {
            url: url.to_string(),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn parses_direct_callback() {
        assert_eq!(
            parse_callback("vm=direct=mp4"),
            Some(CallbackAction::Direct {
                send_type: SendType::VideoNote,
                format: "direct".into(),
                extension: "mp4".into(),
            })
        );
        assert_eq!(
            parse_callback("file=OFL="),
            Some(CallbackAction::Direct {
                send_type: SendType::Document,
                format: "OFL".into(),
                extension: String::new(),
            })
        );
    }

    #[test]
    fn parses_extraction_callback() {
        assert_eq!(
            parse_callback("ytdl_audio"),
            Some(CallbackAction::Extract(ExtractionMode::Audio))
        );
        assert_eq!(
            parse_callback("ytdl_video"),
            Some(CallbackAction::Extract(ExtractionMode::Video))
        );
        assert_eq!(parse_callback("garbage"), None);
        assert_eq!(parse_callback("=x=y"), None);
    }

    #[test]
    fn custom_name_after_star() {
        let source = resolve_source("https://cdn.example/v/123 * My Holiday.mp4", &[]).unwrap();
        assert_eq!(source, link("https://cdn.example/v/123", "My Holiday.mp4"));
    }

    #[test]
    fn default_name_is_decoded_last_segment() {
        let source =
            resolve_source("https://cdn.example/files/My%20Movie.mkv?token=1", &[]).unwrap();
        assert_eq!(source.display_name, "My Movie.mkv");

        let bare = resolve_source("https://cdn.example/", &[]).unwrap();
        assert_eq!(bare.display_name, "cdn.example");
    }

    #[test]
    fn text_link_entity_wins() {
        let entities = [LinkEntity {
            offset: 0,
            length: 8,
            url: Some("https://hidden.example/file.zip".into()),
        }];
        let source = resolve_source("download", &entities).unwrap();
        assert_eq!(source.url, "https://hidden.example/file.zip");
        assert_eq!(source.display_name, "file.zip");
    }

    #[test]
    fn url_entity_offsets_are_utf16() {
        let text = "🎬 grab https://cdn.example/a.mp4 please";
        let entities = [LinkEntity {
            offset: 8,
            length: 25,
            url: None,
        }];
        let source = resolve_source(text, &entities).unwrap();
        assert_eq!(source.url, "https://cdn.example/a.mp4");
    }

    #[test]
    fn url_found_in_text_without_entities() {
        let source = resolve_source("look: https://cdn.example/a.pdf", &[]).unwrap();
        assert_eq!(source.url, "https://cdn.example/a.pdf");
    }

    #[test]
    fn non_http_text_is_not_a_link() {
        assert_eq!(resolve_source("ftp://example.com/a", &[]), None);
        assert_eq!(resolve_source("just words", &[]), None);
    }

    #[test]
    fn keyboard_carries_extension() {
        let rows = keyboard(&link("https://x.example/a.MP4", "a.MP4"));
        let data: Vec<&str> = rows.iter().flatten().map(|b| b.data.as_str()).collect();
        assert_eq!(
            data,
            vec![
                "video=direct=mp4",
                "file=direct=mp4",
                "audio=direct=mp4",
                "vm=direct=mp4",
                "ytdl_audio",
                "ytdl_video"
            ]
        );
        let odd = keyboard(&link("https://x.example/a", "a.some-long-suffix"));
        assert_eq!(odd[0][0].data, "video=direct=");
    }

    #[tokio::test]
    async fn callback_without_source_explains() {
        let root = tempfile::tempdir().unwrap();
        let bot = Arc::new(FakeBot::default());
        let ctx = context(bot.clone(), root.path(), AccessSettings::default());
        let callback = IncomingCallback {
            user: UserId(5),
            data: "file=direct=zip".into(),
            message: MessageRef::new(CHAT, MessageId(40)),
            source: None,
        };
        run_callback(&ctx, callback).await.unwrap();
        assert_eq!(bot.texts(), vec![SOURCE_GONE.to_string()]);
    }

    #[tokio::test]
    async fn direct_callback_uploads_file() {
        let router = Router::new().route(
            "/files/report.pdf",
            get(|| async { ([(header::CONTENT_TYPE, "application/pdf")], vec![9u8; 2048]) }),
        );
        let addr = serve(router).await;

        let root = tempfile::tempdir().unwrap();
        let bot = Arc::new(FakeBot::default());
        let ctx = context(bot.clone(), root.path(), AccessSettings::default());
        let url = format!("http://{}/files/report.pdf", addr);

        let callback = IncomingCallback {
            user: UserId(5),
            data: "video=direct=pdf".into(),
            message: MessageRef::new(CHAT, MessageId(40)),
            source: Some(message(5, 39, &url)),
        };
        run_callback(&ctx, callback).await.unwrap();

        let media: Vec<_> = bot
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Media(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].attachment, Attachment::Document);
        assert_eq!(media[0].file_name, "report.pdf");
        assert_eq!(media[0].caption, Caption::Plain("report.pdf".into()));
        assert_eq!(media[0].reply_to, Some(MessageId(39)));
        assert!(!root.path().join("5").join("report.pdf").exists());
    }

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn double_click_uploads_once() {
        let router = Router::new().route(
            "/files/slow.bin",
            get(|| async {
                let (mut writer, reader) = tokio::io::duplex(4096);
                tokio::spawn(async move {
                    for _ in 0..4 {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        if writer.write_all(&[1u8; 1024]).await.is_err() {
                            return;
                        }
                    }
                });
                (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    axum::body::Body::from_stream(ReaderStream::new(reader)),
                )
            }),
        );
        let addr = serve(router).await;

        let root = tempfile::tempdir().unwrap();
        let bot = Arc::new(FakeBot::default());
        let ctx = context(bot.clone(), root.path(), AccessSettings::default());
        let url = format!("http://{}/files/slow.bin", addr);
        let first = IncomingCallback {
            user: UserId(5),
            data: "file=direct=bin".into(),
            message: MessageRef::new(CHAT, MessageId(40)),
            source: Some(message(5, 39, &url)),
        };
        let second = first.clone();

        let (a, b) = tokio::join!(run_callback(&ctx, first), run_callback(&ctx, second));
        a.unwrap();
        b.unwrap();

        let uploads = bot
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Media(_)))
            .count();
        assert_eq!(uploads, 1);
        assert_eq!(bot.texts().first().map(String::as_str), Some(QUEUED));
        assert!(!root.path().join("5").join("slow.bin").exists());
    }
}

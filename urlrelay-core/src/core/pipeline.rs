use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::core::bridge;
use crate::core::classify;
use crate::core::direct_downloader::{self, DownloadOptions};
use crate::core::dispatch::{self, UploadJob, UploadReport};
use crate::core::events::{MessageStatus, StatusMessage};
use crate::core::traits::{ChatClient, MediaExtractor, MediaProbe};
use crate::error::{DownloadError, TransferError};
use crate::fs_paths::{remove_quietly, ScratchDir};
use crate::messages;
use crate::models::media::{Caption, ChatAction, MediaMetadata};
use crate::models::settings::TransferSettings;
use crate::models::transfer::{
    ExtractionJob, ExtractionMode, ExtractionRequest, ExtractionResult, FileName, TransferRequest,
};

/// Fallback extension tried when the downloaded file is not found under
/// its requested name.
const FALLBACK_EXTENSION: &str = "mkv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Requested,
    Downloading,
    Downloaded,
    TypeReconciled,
    SizeChecked,
    Uploading,
    Completed,
}

/// Shared collaborators of every transfer.
#[derive(Clone)]
pub struct TransferContext {
    pub client: Arc<dyn ChatClient>,
    pub probe: Arc<dyn MediaProbe>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub http: reqwest::Client,
    pub settings: TransferSettings,
    pub scratch: ScratchDir,
}

impl TransferContext {
    pub fn new(
        client: Arc<dyn ChatClient>,
        probe: Arc<dyn MediaProbe>,
        extractor: Arc<dyn MediaExtractor>,
        http: reqwest::Client,
        settings: TransferSettings,
    ) -> Self {
        let scratch = ScratchDir::new(settings.scratch_root.clone());
        Self {
            client,
            probe,
            extractor,
            http,
            settings,
            scratch,
        }
    }
}

fn stage(url: &str, stage: TransferStage) {
    tracing::info!("[transfer] {} -> {:?}", url, stage);
}

/// Downloads a direct URL and sends it back. Any failure replaces the
/// status text with a readable reason.
pub async fn run_direct(
    ctx: &TransferContext,
    request: TransferRequest,
) -> Result<UploadReport, TransferError> {
    let mut status = StatusMessage::new(MessageStatus::new(ctx.client.clone(), request.status));
    stage(&request.url, TransferStage::Requested);

    let result = direct_inner(ctx, &request, &mut status).await;
    match &result {
        Ok(_) => stage(&request.url, TransferStage::Completed),
        // The running transfer owns the status message.
        Err(TransferError::Download(DownloadError::InProgress(path))) => {
            tracing::info!("[transfer] {} already in progress", path.display());
        }
        Err(e) => {
            tracing::warn!(
                "[transfer] {} failed at {:?}: {}",
                request.url,
                e.stage(),
                e
            );
            status.update(e.user_message()).await;
        }
    }
    result
}

async fn direct_inner(
    ctx: &TransferContext,
    request: &TransferRequest,
    status: &mut StatusMessage<MessageStatus>,
) -> Result<UploadReport, TransferError> {
    let started = Instant::now();
    status.update(messages::download_start(&request.file_name)).await;

    let user_dir = ctx.scratch.user_dir(request.user);
    tokio::fs::create_dir_all(&user_dir)
        .await
        .map_err(TransferError::Scratch)?;
    let destination = user_dir.join(request.file_name.to_string());

    stage(&request.url, TransferStage::Downloading);
    let options = DownloadOptions::from(&ctx.settings);
    let downloaded =
        direct_downloader::download(&ctx.http, &request.url, &destination, status, &options).await;
    match downloaded {
        Ok(_) => {}
        Err(e @ DownloadError::InProgress(_)) => return Err(e.into()),
        Err(e) => {
            remove_quietly(&destination).await;
            return Err(e.into());
        }
    }
    let download_elapsed = started.elapsed();

    let (path, file_name) = resolve_downloaded(&destination, &request.file_name).await?;
    stage(&request.url, TransferStage::Downloaded);

    let send_type = classify::reconcile(request.send_type, &file_name.to_string());
    stage(&request.url, TransferStage::TypeReconciled);

    let caption = if request.caption.trim().is_empty() {
        Caption::None
    } else {
        Caption::Plain(request.caption.clone())
    };

    let job = UploadJob {
        chat: request.source.chat,
        reply_to: Some(request.source.id),
        send_type,
        path,
        file_name: file_name.to_string(),
        caption,
        thumbnail: Some(ctx.scratch.thumbnail(request.user)),
        audio_title: None,
        audio_performer: None,
        known_metadata: None,
        side_artifacts: Vec::new(),
        download_elapsed,
    };
    stage(&request.url, TransferStage::Uploading);
    let report = dispatch::dispatch(
        ctx.client.as_ref(),
        ctx.probe.as_ref(),
        job,
        status,
        &ctx.settings,
    )
    .await?;
    Ok(report)
}

/// The downloaded file under its requested name, or under the `.mkv`
/// fallback.
async fn resolve_downloaded(
    destination: &Path,
    name: &FileName,
) -> Result<(PathBuf, FileName), TransferError> {
    if exists(destination).await {
        return Ok((destination.to_path_buf(), name.clone()));
    }
    let fallback_name = name.with_extension(FALLBACK_EXTENSION);
    let fallback = destination.with_file_name(fallback_name.to_string());
    if exists(&fallback).await {
        tracing::info!(
            "[transfer] {} missing, using {}",
            destination.display(),
            fallback.display()
        );
        return Ok((fallback, fallback_name));
    }
    Err(TransferError::FileMissingAfterDownload(destination.to_path_buf()))
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Resolves a page URL with the extractor and sends the result. The status
/// message and the URL message are removed afterwards, whatever the outcome;
/// failures are replied as plain text.
pub async fn run_extraction(
    ctx: &TransferContext,
    request: ExtractionRequest,
) -> Result<UploadReport, TransferError> {
    let chat = request.status.chat;
    let mut status = StatusMessage::new(MessageStatus::new(ctx.client.clone(), request.status));
    stage(&request.url, TransferStage::Requested);

    let result = extraction_inner(ctx, &request, &mut status).await;

    if let Err(e) = ctx.client.send_action(chat, ChatAction::Cancel).await {
        tracing::debug!("[extract] cancel action failed: {:#}", e);
    }
    match &result {
        Ok(_) => stage(&request.url, TransferStage::Completed),
        Err(e) => {
            tracing::warn!(
                "[extract] {} failed at {:?}: {}",
                request.url,
                e.stage(),
                e
            );
            if let Err(send_err) = ctx.client.send_text(chat, None, &e.user_message()).await {
                tracing::warn!("[extract] could not report failure: {:#}", send_err);
            }
        }
    }

    for message in [request.status, request.source] {
        if let Err(e) = ctx.client.delete_message(message).await {
            tracing::warn!("[extract] could not delete message {:?}: {:#}", message.id, e);
        }
    }
    result
}

async fn extraction_inner(
    ctx: &TransferContext,
    request: &ExtractionRequest,
    status: &mut StatusMessage<MessageStatus>,
) -> Result<UploadReport, TransferError> {
    let chat = request.status.chat;
    let started = Instant::now();

    if let Err(e) = ctx.client.send_action(chat, ChatAction::Typing).await {
        tracing::debug!("[extract] typing action failed: {:#}", e);
    }
    status.update(messages::extraction_start(request.mode)).await;

    let output_dir = ctx.scratch.user_dir(request.user);
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(TransferError::Scratch)?;

    let job = ExtractionJob {
        url: request.url.clone(),
        mode: request.mode,
        output_dir,
    };
    let extractor = ctx.extractor.clone();
    let client = ctx.client.clone();

    stage(&request.url, TransferStage::Downloading);
    let extracted = bridge::run_with_heartbeat(
        async move { extractor.extract(&job).await },
        move || {
            let client = client.clone();
            async move {
                if let Err(e) = client.send_action(chat, ChatAction::UploadDocument).await {
                    tracing::debug!("[extract] heartbeat failed: {:#}", e);
                }
            }
        },
        ctx.settings.heartbeat_interval(),
    )
    .await?;
    let download_elapsed = started.elapsed();

    let path = match request.mode {
        ExtractionMode::Audio => rename_webm_audio(&extracted.file_path).await,
        ExtractionMode::Video => extracted.file_path.clone(),
    };
    if !exists(&path).await {
        if let Some(thumbnail) = &extracted.thumbnail_path {
            remove_quietly(thumbnail).await;
        }
        return Err(TransferError::FileMissingAfterDownload(path));
    }
    stage(&request.url, TransferStage::Downloaded);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let job = UploadJob {
        chat,
        reply_to: Some(request.source.id),
        send_type: request.mode.send_type(),
        path,
        file_name,
        caption: Caption::Html(link_caption(&extracted)),
        thumbnail: Some(ctx.scratch.thumbnail(request.user)),
        audio_title: Some(extracted.title.clone()),
        audio_performer: Some(extracted.uploader.clone()),
        known_metadata: Some(MediaMetadata {
            duration_seconds: extracted.duration_seconds,
            width: extracted.width,
            height: extracted.height,
        }),
        side_artifacts: extracted.thumbnail_path.clone().into_iter().collect(),
        download_elapsed,
    };
    stage(&request.url, TransferStage::Uploading);
    let report = dispatch::dispatch(
        ctx.client.as_ref(),
        ctx.probe.as_ref(),
        job,
        status,
        &ctx.settings,
    )
    .await?;
    Ok(report)
}

/// Audio delivered in a WebM container is renamed to `.weba`.
async fn rename_webm_audio(path: &Path) -> PathBuf {
    let is_webm = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("webm"))
        .unwrap_or(false);
    if !is_webm {
        return path.to_path_buf();
    }
    let renamed = path.with_extension("weba");
    match tokio::fs::rename(path, &renamed).await {
        Ok(()) => renamed,
        Err(e) => {
            tracing::warn!("[extract] could not rename {}: {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

fn link_caption(result: &ExtractionResult) -> String {
    format!(
        "<b><a href=\"{}\">{}</a></b>",
        escape_html(&result.webpage_url),
        escape_html(&result.title)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::header;
    use axum::routing::get;
    use axum::Router;

    use crate::core::traits::test_support::{serve, Call, FixedProbe, RecordingClient};
    use crate::models::media::Attachment;
    use crate::models::transfer::{ChatId, MessageId, MessageRef, SendType, UserId};

    const CHAT: ChatId = ChatId(7);

    struct FakeExtractor {
        body: Vec<u8>,
        file_name: &'static str,
        fail: Option<&'static str>,
    }

    #[async_trait]
    impl MediaExtractor for FakeExtractor {
        async fn extract(&self, job: &ExtractionJob) -> anyhow::Result<ExtractionResult> {
            if let Some(reason) = self.fail {
                anyhow::bail!("{}", reason);
            }
            let file_path = job.output_dir.join(self.file_name);
            tokio::fs::write(&file_path, &self.body).await?;
            let thumbnail_path = job.output_dir.join("thumb.webp");
            tokio::fs::write(&thumbnail_path, b"img").await?;
            Ok(ExtractionResult {
                file_path,
                title: "A & B".into(),
                webpage_url: job.url.clone(),
                duration_seconds: 185,
                width: 1280,
                height: 720,
                uploader: "Channel".into(),
                thumbnail_url: None,
                thumbnail_path: Some(thumbnail_path),
            })
        }
    }

    fn context(
        client: Arc<RecordingClient>,
        extractor: FakeExtractor,
        root: &Path,
    ) -> TransferContext {
        let settings = TransferSettings {
            scratch_root: root.to_path_buf(),
            ..TransferSettings::default()
        };
        TransferContext::new(
            client,
            Arc::new(FixedProbe(None)),
            Arc::new(extractor),
            reqwest::Client::new(),
            settings,
        )
    }

    fn no_extractor() -> FakeExtractor {
        FakeExtractor {
            body: Vec::new(),
            file_name: "unused",
            fail: Some("not used"),
        }
    }

    fn direct_request(url: String, send_type: SendType, name: FileName) -> TransferRequest {
        TransferRequest {
            url,
            send_type,
            file_name: name,
            caption: String::new(),
            user: UserId(42),
            status: MessageRef::new(CHAT, MessageId(11)),
            source: MessageRef::new(CHAT, MessageId(10)),
        }
    }

    async fn file_server() -> String {
        let router = Router::new()
            .route(
                "/archive.zip",
                get(|| async {
                    ([(header::CONTENT_TYPE, "application/zip")], vec![3u8; 4096])
                }),
            )
            .route(
                "/error",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<h1>gone</h1>") }),
            );
        serve(router).await
    }

    #[test]
    fn caption_is_escaped() {
        let result = ExtractionResult {
            title: "Tom & \"Jerry\" <live>".into(),
            webpage_url: "https://example.com/watch?v=1&t=2".into(),
            ..ExtractionResult::default()
        };
        assert_eq!(
            link_caption(&result),
            "<b><a href=\"https://example.com/watch?v=1&amp;t=2\">Tom &amp; &quot;Jerry&quot; &lt;live&gt;</a></b>"
        );
    }

    #[tokio::test]
    async fn direct_video_request_for_zip_is_sent_as_document() {
        let base = file_server().await;
        let root = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let ctx = context(client.clone(), no_extractor(), root.path());

        let report = run_direct(
            &ctx,
            direct_request(
                format!("{}/archive.zip", base),
                SendType::Video,
                FileName::new("archive", "zip"),
            ),
        )
        .await
        .unwrap();

        assert_eq!(report.send_type, SendType::Document);
        assert_eq!(report.bytes, 4096);
        let media = client.media();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].attachment, Attachment::Document);
        assert_eq!(media[0].reply_to, Some(MessageId(10)));
        assert_eq!(media[0].file_name, "archive.zip");
        assert!(!root.path().join("42").join("archive.zip").exists());
        assert!(client.edits().last().unwrap().starts_with("Downloaded in"));
    }

    #[tokio::test]
    async fn error_page_replaces_status_text() {
        let base = file_server().await;
        let root = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let ctx = context(client.clone(), no_extractor(), root.path());

        let err = run_direct(
            &ctx,
            direct_request(
                format!("{}/error", base),
                SendType::Document,
                FileName::new("page", "bin"),
            ),
        )
        .await
        .unwrap_err();

        assert_eq!(err.stage(), TransferStage::Downloading);
        assert!(client.media().is_empty());
        assert_eq!(
            client.edits().last().cloned(),
            Some(messages::empty_or_error_content())
        );
        assert!(!root.path().join("42").join("page.bin").exists());
    }

    #[tokio::test]
    async fn duplicate_request_keeps_the_running_file() {
        let base = file_server().await;
        let root = tempfile::tempdir().unwrap();
        let user_dir = root.path().join("42");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("archive.zip"), b"partial").unwrap();
        let client = Arc::new(RecordingClient::default());
        let ctx = context(client.clone(), no_extractor(), root.path());

        let err = run_direct(
            &ctx,
            direct_request(
                format!("{}/archive.zip", base),
                SendType::Document,
                FileName::new("archive", "zip"),
            ),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::Download(DownloadError::InProgress(_))));
        assert!(client.media().is_empty());
        assert_eq!(std::fs::read(user_dir.join("archive.zip")).unwrap(), b"partial");
        assert!(!client
            .edits()
            .iter()
            .any(|text| text == messages::ALREADY_DOWNLOADING));
    }

    #[tokio::test]
    async fn mkv_fallback_is_used() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("42");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("clip.mkv"), b"data").unwrap();

        let (path, name) = resolve_downloaded(&dir.join("clip.mp4"), &FileName::new("clip", "mp4"))
            .await
            .unwrap();
        assert_eq!(path, dir.join("clip.mkv"));
        assert_eq!(name.to_string(), "clip.mkv");

        let err = resolve_downloaded(&dir.join("other.mp4"), &FileName::new("other", "mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FileMissingAfterDownload(_)));
    }

    #[tokio::test]
    async fn webm_audio_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let webm = dir.path().join("song.webm");
        std::fs::write(&webm, b"a").unwrap();
        let renamed = rename_webm_audio(&webm).await;
        assert_eq!(renamed, dir.path().join("song.weba"));
        assert!(renamed.exists());

        let m4a = dir.path().join("song.m4a");
        assert_eq!(rename_webm_audio(&m4a).await, m4a);
    }

    fn extraction_request(mode: ExtractionMode) -> ExtractionRequest {
        ExtractionRequest {
            url: "https://video.example/watch?v=abc".into(),
            mode,
            user: UserId(42),
            status: MessageRef::new(CHAT, MessageId(21)),
            source: MessageRef::new(CHAT, MessageId(20)),
        }
    }

    #[tokio::test]
    async fn extraction_success_sends_audio_and_clears_messages() {
        let root = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let extractor = FakeExtractor {
            body: vec![5u8; 256],
            file_name: "Song - youtube-abc.webm",
            fail: None,
        };
        let ctx = context(client.clone(), extractor, root.path());

        let report = run_extraction(&ctx, extraction_request(ExtractionMode::Audio))
            .await
            .unwrap();

        assert_eq!(report.send_type, SendType::Audio);
        let media = client.media();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].file_name, "Song - youtube-abc.weba");
        assert_eq!(
            media[0].attachment,
            Attachment::Audio {
                duration_seconds: 185,
                title: Some("A & B".into()),
                performer: Some("Channel".into()),
            }
        );
        assert!(matches!(&media[0].caption, Caption::Html(html) if html.contains("A &amp; B")));

        let calls = client.calls();
        assert_eq!(calls.first(), Some(&Call::Action(CHAT, ChatAction::Typing)));
        assert!(calls.contains(&Call::Delete(MessageRef::new(CHAT, MessageId(21)))));
        assert!(calls.contains(&Call::Delete(MessageRef::new(CHAT, MessageId(20)))));

        let user_dir = root.path().join("42");
        assert!(!user_dir.join("Song - youtube-abc.weba").exists());
        assert!(!user_dir.join("thumb.webp").exists());
    }

    struct ThumbnailOnly;

    #[async_trait]
    impl MediaExtractor for ThumbnailOnly {
        async fn extract(&self, job: &ExtractionJob) -> anyhow::Result<ExtractionResult> {
            let thumbnail_path = job.output_dir.join("thumb.webp");
            tokio::fs::write(&thumbnail_path, b"img").await?;
            Ok(ExtractionResult {
                file_path: job.output_dir.join("never-written.mp4"),
                thumbnail_path: Some(thumbnail_path),
                ..ExtractionResult::default()
            })
        }
    }

    #[tokio::test]
    async fn missing_extracted_file_removes_thumbnail() {
        let root = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let ctx = TransferContext::new(
            client.clone(),
            Arc::new(FixedProbe(None)),
            Arc::new(ThumbnailOnly),
            reqwest::Client::new(),
            TransferSettings {
                scratch_root: root.path().to_path_buf(),
                ..TransferSettings::default()
            },
        );

        let err = run_extraction(&ctx, extraction_request(ExtractionMode::Video))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::FileMissingAfterDownload(_)));
        assert!(client.media().is_empty());
        assert!(!root.path().join("42").join("thumb.webp").exists());
    }

    #[tokio::test]
    async fn extraction_failure_is_replied() {
        let root = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let extractor = FakeExtractor {
            body: Vec::new(),
            file_name: "x",
            fail: Some("ERROR: Unsupported URL"),
        };
        let ctx = context(client.clone(), extractor, root.path());

        let err = run_extraction(&ctx, extraction_request(ExtractionMode::Video))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Extraction(_)));
        assert!(client.media().is_empty());
        let calls = client.calls();
        assert!(calls
            .iter()
            .any(|c| matches!(c, Call::SendText(_, text) if text.contains("Unsupported URL"))));
        assert!(calls.contains(&Call::Delete(MessageRef::new(CHAT, MessageId(21)))));
        assert!(calls.contains(&Call::Delete(MessageRef::new(CHAT, MessageId(20)))));
    }
}

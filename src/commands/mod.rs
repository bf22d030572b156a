use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use urlrelay_core::core::traits::ChatClient;
use urlrelay_core::models::transfer::{MessageId, MessageRef, UserId};
use urlrelay_core::TransferContext;

use crate::models::settings::AccessSettings;

pub mod downloads;
pub mod settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// A link annotation on a message. Offsets count UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntity {
    pub offset: usize,
    pub length: usize,
    /// Target of a text link; `None` for a bare URL in the text.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message: MessageRef,
    pub user: UserId,
    pub text: String,
    pub entities: Vec<LinkEntity>,
    pub has_photo: bool,
    pub has_document: bool,
    pub reply_to: Option<RepliedMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepliedMessage {
    pub id: MessageId,
    pub has_document: bool,
}

#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub user: UserId,
    pub data: String,
    /// The bot message carrying the keyboard; it becomes the status message.
    pub message: MessageRef,
    /// The user's message the keyboard replied to.
    pub source: Option<IncomingMessage>,
}

/// Platform operations used by the bot handlers on top of [`ChatClient`].
#[async_trait]
pub trait BotApi: ChatClient {
    async fn send_keyboard(
        &self,
        message: MessageRef,
        text: &str,
        rows: Vec<Vec<Button>>,
    ) -> anyhow::Result<MessageRef>;

    /// Saves the photo or document attached to `message`.
    async fn download_attachment(
        &self,
        message: MessageRef,
        destination: &Path,
    ) -> anyhow::Result<()>;
}

pub struct BotContext {
    pub api: Arc<dyn BotApi>,
    pub transfer: TransferContext,
    pub access: AccessSettings,
    pub cookie_file: PathBuf,
    pub limiter: Arc<Semaphore>,
}

/// The command name of `/name@bot args`, lower-cased.
fn command_name(text: &str) -> Option<String> {
    let first = text.trim_start().split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

pub async fn handle_message(ctx: &BotContext, msg: IncomingMessage) -> anyhow::Result<()> {
    if !ctx.access.is_allowed(msg.user.0) {
        tracing::debug!("[bot] ignoring message from {}", msg.user);
        return Ok(());
    }

    match command_name(&msg.text).as_deref() {
        Some("start") => settings::start(ctx, &msg).await,
        Some("help") => settings::help(ctx, &msg).await,
        Some("delthumb") => settings::delete_thumbnail(ctx, &msg).await,
        Some("showthumb") => settings::show_thumbnail(ctx, &msg).await,
        Some("cookies") => settings::set_cookies(ctx, &msg).await,
        Some(other) => {
            tracing::debug!("[bot] unknown command /{}", other);
            Ok(())
        }
        None if msg.has_photo => settings::save_thumbnail(ctx, &msg).await,
        None => downloads::offer_options(ctx, &msg).await,
    }
}

pub async fn handle_callback(ctx: &BotContext, callback: IncomingCallback) -> anyhow::Result<()> {
    if !ctx.access.is_allowed(callback.user.0) {
        tracing::debug!("[bot] ignoring callback from {}", callback.user);
        return Ok(());
    }
    downloads::run_callback(ctx, callback).await
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn command_names() {
        assert_eq!(command_name("/start").as_deref(), Some("start"));
        assert_eq!(command_name("/Help@UrlRelayBot now").as_deref(), Some("help"));
        assert_eq!(command_name("https://example.com/a"), None);
        assert_eq!(command_name("/"), None);
    }

    #[tokio::test]
    async fn unauthorised_users_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let bot = Arc::new(FakeBot::default());
        let access = AccessSettings {
            owner_id: Some(1),
            auth_users: vec![1, 2],
        };
        let ctx = context(bot.clone(), root.path(), access);

        handle_message(&ctx, message(3, 10, "/start")).await.unwrap();
        assert!(bot.sent().is_empty());

        handle_message(&ctx, message(2, 11, "/start")).await.unwrap();
        assert_eq!(bot.sent().len(), 1);
    }

    #[tokio::test]
    async fn url_message_gets_a_keyboard() {
        let root = tempfile::tempdir().unwrap();
        let bot = Arc::new(FakeBot::default());
        let ctx = context(bot.clone(), root.path(), AccessSettings::default());

        handle_message(&ctx, message(5, 10, "https://cdn.example/movie.mp4"))
            .await
            .unwrap();

        match bot.sent().as_slice() {
            [Sent::Keyboard(reply_to, _, rows)] => {
                assert_eq!(reply_to.id, MessageId(10));
                assert!(rows.iter().flatten().any(|b| b.data == "video=direct=mp4"));
                assert!(rows.iter().flatten().any(|b| b.data == "ytdl_audio"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn plain_text_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        let bot = Arc::new(FakeBot::default());
        let ctx = context(bot.clone(), root.path(), AccessSettings::default());

        handle_message(&ctx, message(5, 10, "hello there")).await.unwrap();
        assert!(bot.sent().is_empty());
    }
}

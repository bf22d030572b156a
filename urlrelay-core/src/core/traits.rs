use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::media::{ChatAction, MediaMetadata, OutgoingMedia};
use crate::models::transfer::{ChatId, ExtractionJob, ExtractionResult, MessageId, MessageRef};

/// The messaging platform as seen by the transfer pipeline.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> anyhow::Result<MessageRef>;

    async fn edit_text(&self, message: MessageRef, text: &str) -> anyhow::Result<()>;

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()>;

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> anyhow::Result<()>;

    /// Uploads and sends one attachment. Byte counts of each uploaded piece
    /// are reported on `progress`.
    async fn send_media(
        &self,
        media: OutgoingMedia,
        progress: mpsc::UnboundedSender<u64>,
    ) -> anyhow::Result<MessageRef>;
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> anyhow::Result<MediaMetadata>;
}

/// Resolves a page URL into a downloaded media file plus metadata.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, job: &ExtractionJob) -> anyhow::Result<ExtractionResult>;
}

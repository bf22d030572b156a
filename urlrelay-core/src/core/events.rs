use std::sync::Arc;

use async_trait::async_trait;

use crate::core::traits::ChatClient;
use crate::models::transfer::MessageRef;

/// Destination of rendered status text.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, text: &str) -> anyhow::Result<()>;
}

/// Edits one platform message in place.
#[derive(Clone)]
pub struct MessageStatus {
    client: Arc<dyn ChatClient>,
    message: MessageRef,
}

impl MessageStatus {
    pub fn new(client: Arc<dyn ChatClient>, message: MessageRef) -> Self {
        Self { client, message }
    }
}

#[async_trait]
impl StatusSink for MessageStatus {
    async fn publish(&self, text: &str) -> anyhow::Result<()> {
        self.client.edit_text(self.message, text).await
    }
}

/// The status message of one transfer. Text identical to the last
/// delivered text is never re-sent.
pub struct StatusMessage<S: StatusSink> {
    sink: S,
    last: Option<String>,
}

impl<S: StatusSink> StatusMessage<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, last: None }
    }

    /// Returns whether the text reached the sink. Sink failures are logged
    /// and never abort the transfer; the text is retried on the next update.
    pub async fn update(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        if self.last.as_deref() == Some(text.as_str()) {
            return false;
        }
        match self.sink.publish(&text).await {
            Ok(()) => {
                self.last = Some(text);
                true
            }
            Err(e) => {
                tracing::warn!("[status] edit failed: {:#}", e);
                false
            }
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

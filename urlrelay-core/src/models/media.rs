use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::transfer::{ChatId, MessageId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub duration_seconds: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caption {
    None,
    Plain(String),
    Html(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Video {
        duration_seconds: u32,
        width: u32,
        height: u32,
        supports_streaming: bool,
    },
    Audio {
        duration_seconds: u32,
        title: Option<String>,
        performer: Option<String>,
    },
    VideoNote {
        duration_seconds: u32,
        length: u32,
    },
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
    Cancel,
}

/// Everything the platform client needs to send one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub chat: ChatId,
    pub reply_to: Option<MessageId>,
    pub path: PathBuf,
    pub file_name: String,
    pub caption: Caption,
    pub thumbnail: Option<PathBuf>,
    pub attachment: Attachment,
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: ChatId,
    pub id: MessageId,
}

impl MessageRef {
    pub fn new(chat: ChatId, id: MessageId) -> Self {
        Self { chat, id }
    }
}

/// Attachment kind the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendType {
    Video,
    Audio,
    VideoNote,
    Document,
}

impl SendType {
    /// Parses the tag carried in callback data. Unknown tags fall back to
    /// a plain document.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "video" => SendType::Video,
            "audio" => SendType::Audio,
            "vm" => SendType::VideoNote,
            _ => SendType::Document,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SendType::Video => "video",
            SendType::Audio => "audio",
            SendType::VideoNote => "vm",
            SendType::Document => "file",
        }
    }
}

/// A target filename split once into its base and extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileName {
    base: String,
    extension: String,
}

impl FileName {
    pub fn new(base: impl Into<String>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            base: base.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Splits `name` on its last dot. A leading dot (`.bashrc`) is part of
    /// the base, not an extension.
    pub fn parse(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() && !ext.is_empty() => Self::new(base, ext),
            _ => Self::new(name, ""),
        }
    }

    /// Builds the name from a display name and the extension picked by the
    /// user. The extension is appended unless the display name already ends
    /// with it.
    pub fn from_display(display: &str, extension: &str) -> Self {
        let display = display.trim();
        let extension = extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            return Self::parse(display);
        }
        let suffix = format!(".{}", extension);
        if let Some(start) = display.len().checked_sub(suffix.len()).filter(|s| *s > 0) {
            if let Some(tail) = display.get(start..) {
                if tail.eq_ignore_ascii_case(&suffix) {
                    return Self::new(&display[..start], &tail[1..]);
                }
            }
        }
        Self::new(display, extension)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn with_extension(&self, extension: &str) -> Self {
        Self::new(self.base.clone(), extension)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extension.is_empty() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}.{}", self.base, self.extension)
        }
    }
}

/// One direct-URL transfer, fixed once the user picks a delivery option.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub send_type: SendType,
    pub file_name: FileName,
    pub caption: String,
    pub user: UserId,
    /// Message edited in place with progress.
    pub status: MessageRef,
    /// The user's message holding the URL; uploads reply to it.
    pub source: MessageRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Audio,
    Video,
}

impl ExtractionMode {
    pub fn format_selector(self) -> &'static str {
        match self {
            ExtractionMode::Audio => "bestaudio",
            ExtractionMode::Video => "best[ext=mp4]",
        }
    }

    pub fn send_type(self) -> SendType {
        match self {
            ExtractionMode::Audio => SendType::Audio,
            ExtractionMode::Video => SendType::Video,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub url: String,
    pub mode: ExtractionMode,
    pub user: UserId,
    pub status: MessageRef,
    pub source: MessageRef,
}

/// Input handed to the extraction collaborator.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub url: String,
    pub mode: ExtractionMode,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub file_path: PathBuf,
    pub title: String,
    pub webpage_url: String,
    pub duration_seconds: u32,
    pub width: u32,
    pub height: u32,
    pub uploader: String,
    pub thumbnail_url: Option<String>,
    /// Thumbnail written next to the media by the extractor, deleted after upload.
    pub thumbnail_path: Option<PathBuf>,
}

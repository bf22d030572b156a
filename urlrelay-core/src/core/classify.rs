use crate::models::transfer::SendType;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ogv",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "opus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Audio,
    Document,
}

impl From<FileKind> for SendType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Video => SendType::Video,
            FileKind::Audio => SendType::Audio,
            FileKind::Document => SendType::Document,
        }
    }
}

pub fn classify(filename: &str) -> FileKind {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => return FileKind::Document,
    };
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Video
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Audio
    } else {
        FileKind::Document
    }
}

/// Corrects a generic "video" choice when the file is not a video
/// container. Other declared types pass through.
pub fn reconcile(declared: SendType, filename: &str) -> SendType {
    if declared != SendType::Video {
        return declared;
    }
    match classify(filename) {
        FileKind::Video => SendType::Video,
        other => {
            tracing::info!(
                "Correcting send type from video to {:?} for {}",
                other,
                filename
            );
            other.into()
        }
    }
}

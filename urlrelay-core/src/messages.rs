//! Chat texts shown to the requesting user.

use crate::core::progress::humanize_bytes;
use crate::models::transfer::{ExtractionMode, FileName};

pub const UPLOAD_START: &str = "**Uploading...**";

pub const ALREADY_DOWNLOADING: &str = "This file is already being downloaded.";

pub fn download_start(name: &FileName) -> String {
    format!("**Downloading** `{}`\n\nPlease wait...", name)
}

pub fn extraction_start(mode: ExtractionMode) -> String {
    match mode {
        ExtractionMode::Audio => "**Downloading audio...**".to_string(),
        ExtractionMode::Video => "**Downloading video...**".to_string(),
    }
}

pub fn slow_url(limit_secs: u64) -> String {
    format!(
        "The source is too slow: the download did not finish within {} seconds.",
        limit_secs
    )
}

pub fn empty_or_error_content() -> String {
    "The server did not send a file (it looks like an error page). Check the link and try again."
        .to_string()
}

pub fn no_file_found(reason: &str) -> String {
    format!("Could not find a downloadable file.\n\nReason: {}", reason)
}

pub fn too_large(size: u64, max: u64) -> String {
    format!(
        "The file is {}, above the {} upload limit. Nothing was uploaded.",
        humanize_bytes(size),
        humanize_bytes(max)
    )
}

pub fn download_failed(reason: &str) -> String {
    format!("Download failed: {}", reason)
}

pub fn upload_failed(reason: &str) -> String {
    format!("Upload failed: {}", reason)
}

pub fn after_upload(download_secs: u64, upload_secs: u64) -> String {
    format!(
        "Downloaded in {} seconds.\nUploaded in {} seconds.\n\nThanks for using the bot!",
        download_secs, upload_secs
    )
}

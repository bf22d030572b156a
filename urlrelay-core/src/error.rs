use std::path::PathBuf;
use std::time::Duration;

use crate::core::pipeline::TransferStage;
use crate::messages;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("server returned a non-file response ({content_type}, {length} bytes)")]
    EmptyOrErrorContent { content_type: String, length: u64 },
    #[error("download did not finish within {0:?}")]
    Timeout(Duration),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    /// Another transfer is already writing this file.
    #[error("{} is already being downloaded", .0.display())]
    InProgress(PathBuf),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file not found: {0}")]
    FileMissing(PathBuf),
    #[error("file is empty: {0}")]
    EmptyFile(PathBuf),
    #[error("file is {size} bytes, limit is {max}")]
    FileTooLarge { size: u64, max: u64 },
    #[error("upload failed: {0:#}")]
    UploadFailed(#[source] anyhow::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{0}")]
    Failed(String),
    #[error("extraction task panicked: {0}")]
    Panicked(String),
    #[error("extraction task was cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("file not found after download: {0}")]
    FileMissingAfterDownload(PathBuf),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("scratch directory error: {0}")]
    Scratch(#[source] std::io::Error),
}

impl TransferError {
    /// Stage the transfer was in when it failed.
    pub fn stage(&self) -> TransferStage {
        match self {
            TransferError::Download(_) | TransferError::Scratch(_) => TransferStage::Downloading,
            TransferError::Extraction(_) => TransferStage::Downloading,
            TransferError::FileMissingAfterDownload(_) => TransferStage::Downloaded,
            TransferError::Upload(UploadError::FileTooLarge { .. }) => TransferStage::SizeChecked,
            TransferError::Upload(UploadError::FileMissing(_) | UploadError::EmptyFile(_)) => {
                TransferStage::Downloaded
            }
            TransferError::Upload(_) => TransferStage::Uploading,
        }
    }

    /// Text that replaces the status message when the transfer ends here.
    pub fn user_message(&self) -> String {
        match self {
            TransferError::Download(DownloadError::EmptyOrErrorContent { .. }) => {
                messages::empty_or_error_content()
            }
            TransferError::Download(DownloadError::Timeout(limit)) => {
                messages::slow_url(limit.as_secs())
            }
            TransferError::Download(DownloadError::InProgress(_)) => {
                messages::ALREADY_DOWNLOADING.to_string()
            }
            TransferError::Download(e) => messages::download_failed(&e.to_string()),
            TransferError::FileMissingAfterDownload(_) => {
                messages::no_file_found("File not found after download")
            }
            TransferError::Upload(UploadError::FileTooLarge { size, max }) => {
                messages::too_large(*size, *max)
            }
            TransferError::Upload(UploadError::FileMissing(_) | UploadError::EmptyFile(_)) => {
                messages::no_file_found("The downloaded file is missing or empty")
            }
            TransferError::Upload(e) => messages::upload_failed(&e.to_string()),
            TransferError::Extraction(e) => e.to_string(),
            TransferError::Scratch(e) => messages::download_failed(&e.to_string()),
        }
    }
}

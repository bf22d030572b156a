pub mod core;
pub mod error;
pub mod fs_paths;
pub mod messages;
pub mod models;

pub use crate::core::pipeline::{run_direct, run_extraction, TransferContext, TransferStage};
pub use crate::error::{DownloadError, ExtractionError, TransferError, UploadError};

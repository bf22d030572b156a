use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables the transfer pipeline reads. Loaded by the application from
/// its environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub scratch_root: PathBuf,
    pub max_file_size: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

pub const TG_MAX_FILE_SIZE: u64 = 4_194_304_000;

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_process_timeout_secs() -> u64 {
    3700
}

fn default_progress_interval_secs() -> u64 {
    5
}

fn default_heartbeat_interval_secs() -> u64 {
    3
}

impl TransferSettings {
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from("./DOWNLOADS"),
            max_file_size: TG_MAX_FILE_SIZE,
            chunk_size: default_chunk_size(),
            process_timeout_secs: default_process_timeout_secs(),
            progress_interval_secs: default_progress_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

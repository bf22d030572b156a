pub mod bridge;
pub mod classify;
pub mod direct_downloader;
pub mod dispatch;
pub mod events;
pub mod pipeline;
pub mod progress;
pub mod traits;

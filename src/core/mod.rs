pub mod ffprobe;
pub mod filename;
pub mod http_client;
pub mod process;
pub mod ytdlp;

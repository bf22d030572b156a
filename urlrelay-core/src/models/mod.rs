pub mod media;
pub mod settings;
pub mod transfer;

pub mod config;
pub mod upload;

pub use config::UploadConfig;
pub use upload::{Entry, UploadManager};

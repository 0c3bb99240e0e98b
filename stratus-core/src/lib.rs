mod client;
mod upload;

pub use client::{ApiErrorClass, Node, NodeKind, StratusClient, StratusError};
pub use reqwest::StatusCode;
pub use upload::{ProgressFn, UploadSource};

use std::env;

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;
const CONCURRENCY_ENV: &str = "STRATUS_UPLOAD_CONCURRENCY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    /// Maximum number of file transfers running at once.
    pub concurrency_limit: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: read_limit(CONCURRENCY_ENV, DEFAULT_CONCURRENCY_LIMIT),
        }
    }
}

impl UploadConfig {
    pub fn with_limit(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
        }
    }
}

fn read_limit(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

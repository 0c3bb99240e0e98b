use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use reqwest::Body;
use tokio_util::io::ReaderStream;

const CHUNK_SIZE: usize = 64 * 1024;

/// Receives `(bytes_sent, total_bytes)` while a body is being streamed.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where the bytes of an uploaded file come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    Path(PathBuf),
    Memory(Bytes),
}

impl UploadSource {
    pub async fn len(&self) -> io::Result<u64> {
        match self {
            UploadSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
            UploadSource::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub(crate) async fn into_body(self, progress: ProgressFn) -> io::Result<(Body, u64)> {
        match self {
            UploadSource::Path(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let total = file.metadata().await?.len();
                let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
                Ok((Body::wrap_stream(track(stream, total, progress)), total))
            }
            UploadSource::Memory(bytes) => {
                let total = bytes.len() as u64;
                let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
                    .collect();
                let stream = stream::iter(chunks);
                Ok((Body::wrap_stream(track(stream, total, progress)), total))
            }
        }
    }
}

fn track<S>(
    stream: S,
    total: u64,
    progress: ProgressFn,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let mut sent = 0u64;
    stream.inspect(move |chunk| {
        if let Ok(chunk) = chunk {
            sent = sent.saturating_add(chunk.len() as u64);
            progress(sent, total);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn tracked_stream_reports_cumulative_bytes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |sent, total| {
            sink.lock().unwrap().push((sent, total));
        });
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"de")),
        ];
        let collected: Vec<_> = track(stream::iter(chunks), 5, progress).collect().await;

        assert_eq!(collected.len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![(3, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn reports_source_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"payload").unwrap();

        assert_eq!(UploadSource::Path(path).len().await.unwrap(), 7);
        assert_eq!(
            UploadSource::Memory(Bytes::from_static(b"xy")).len().await.unwrap(),
            2
        );
    }
}

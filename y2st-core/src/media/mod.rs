//! `MediaSource` — on-demand audio frame producer for a URL. A child process
//! wraps the third-party downloader (out of scope; only the frame contract
//! is specified here); PCM lands in the same lock-free SPSC ring buffer
//! idiom the reference engine uses for its own audio capture.

mod process;

pub use process::ProcessMediaSource;

use async_trait::async_trait;

use crate::error::MediaError;

/// One 16-bit little-endian mono PCM frame at the stream's fixed sample rate.
pub type PcmBytes = Vec<u8>;

/// Snapshot of a `PcmStream`'s buffering health, used by `StreamController`
/// to decide when to invoke the drop-oldest-segment backpressure policy
/// (§5: `max_stall_ms`, default 3000ms).
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaHealth {
    pub stalled_ms: u64,
}

/// A one-shot, forward-only PCM byte stream. Seeking is not supported.
#[async_trait]
pub trait PcmStream: Send {
    /// Read the next available chunk of PCM bytes, or `None` on natural
    /// end-of-stream. Blocks (asynchronously) while the source is open but
    /// has produced nothing new yet.
    async fn next_chunk(&mut self) -> Option<PcmBytes>;

    /// Idempotent. Terminates the child process within a bounded deadline
    /// (≤2s); a child that does not exit in time is killed.
    async fn close(&mut self);

    fn health(&self) -> MediaHealth;
}

/// Contract: `open(url, cookies_blob?) → PcmStream`.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, url: &str, cookies: Option<&[u8]>) -> Result<Box<dyn PcmStream>, MediaError>;
}

/// In-memory test double: yields a fixed sequence of PCM chunks (or fails to
/// start, if configured), with no child process involved.
pub struct FakeMediaSource {
    chunks: Vec<PcmBytes>,
    start_failure: Option<MediaError>,
}

impl FakeMediaSource {
    pub fn new(chunks: Vec<PcmBytes>) -> Self {
        Self {
            chunks,
            start_failure: None,
        }
    }

    pub fn failing(error: MediaError) -> Self {
        Self {
            chunks: Vec::new(),
            start_failure: Some(error),
        }
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn open(&self, _url: &str, _cookies: Option<&[u8]>) -> Result<Box<dyn PcmStream>, MediaError> {
        if let Some(err) = &self.start_failure {
            return Err(match err {
                MediaError::StartFailure { kind, message } => MediaError::StartFailure {
                    kind: *kind,
                    message: message.clone(),
                },
                MediaError::Io(e) => MediaError::Io(std::io::Error::new(e.kind(), e.to_string())),
            });
        }
        Ok(Box::new(FakePcmStream {
            remaining: self.chunks.clone().into_iter().collect(),
        }))
    }
}

struct FakePcmStream {
    remaining: std::collections::VecDeque<PcmBytes>,
}

#[async_trait]
impl PcmStream for FakePcmStream {
    async fn next_chunk(&mut self) -> Option<PcmBytes> {
        self.remaining.pop_front()
    }

    async fn close(&mut self) {
        self.remaining.clear();
    }

    fn health(&self) -> MediaHealth {
        MediaHealth::default()
    }
}

//! Child-process `MediaSource`: spawns the external stream downloader and
//! reads its stdout as raw 16-bit little-endian mono PCM.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::{MediaHealth, MediaSource, PcmBytes, PcmStream};
use crate::error::{MediaError, MediaFailureKind};

const READ_CHUNK_BYTES: usize = 16 * 1024;
const CHANNEL_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Spawns `downloader_path url` (plus `--cookies -` with cookies piped on a
/// second fd when present) and streams its stdout into a bounded channel.
/// The channel plays the same role the reference engine's lock-free ring
/// buffer plays for its audio callback: a fixed-capacity handoff between a
/// producer that cannot be slowed down and a consumer that may stall.
pub struct ProcessMediaSource {
    downloader_path: String,
}

impl ProcessMediaSource {
    pub fn new(downloader_path: impl Into<String>) -> Self {
        Self {
            downloader_path: downloader_path.into(),
        }
    }
}

#[async_trait]
impl MediaSource for ProcessMediaSource {
    async fn open(&self, url: &str, cookies: Option<&[u8]>) -> Result<Box<dyn PcmStream>, MediaError> {
        let mut cmd = Command::new(&self.downloader_path);
        cmd.arg(url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(MediaError::Io)?;

        if let Some(cookies) = cookies {
            if let Some(mut stdin) = child.stdin.take() {
                let cookies = cookies.to_vec();
                tokio::spawn(async move {
                    use tokio::io::AsyncWriteExt;
                    let _ = stdin.write_all(&cookies).await;
                    let _ = stdin.shutdown().await;
                });
            }
        } else {
            drop(child.stdin.take());
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::StartFailure {
                kind: MediaFailureKind::Unavailable,
                message: "downloader produced no stdout pipe".to_string(),
            })?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stalled_since = Arc::new(Mutex::new(None::<Instant>));
        let stall_marker = Arc::clone(&stalled_since);

        let reader = tokio::spawn(async move { read_loop(stdout, tx, stall_marker).await });

        Ok(Box::new(ProcessPcmStream {
            child: Some(child),
            rx,
            reader: Some(reader),
            stalled_since,
        }))
    }
}

async fn read_loop(
    mut stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<PcmBytes>,
    stalled_since: Arc<Mutex<Option<Instant>>>,
) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        match tx.try_send(buf[..n].to_vec()) {
            Ok(()) => {
                *stalled_since.lock() = None;
            }
            Err(mpsc::error::TrySendError::Full(chunk)) => {
                stalled_since.lock().get_or_insert_with(Instant::now);
                if tx.send(chunk).await.is_err() {
                    return;
                }
                *stalled_since.lock() = None;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

struct ProcessPcmStream {
    child: Option<Child>,
    rx: mpsc::Receiver<PcmBytes>,
    reader: Option<tokio::task::JoinHandle<()>>,
    stalled_since: Arc<Mutex<Option<Instant>>>,
}

#[async_trait]
impl PcmStream for ProcessPcmStream {
    async fn next_chunk(&mut self) -> Option<PcmBytes> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            tracing::debug!("sending kill to media process failed (already exited?): {e}");
        }
        if tokio::time::timeout(CLOSE_GRACE, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
    }

    fn health(&self) -> MediaHealth {
        let stalled_ms = self
            .stalled_since
            .lock()
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or(0);
        MediaHealth { stalled_ms }
    }
}

//! `StreamController` — the per-stream lifecycle state machine wiring
//! MediaSource → VADSegmenter → TranscriptionWorkerPool → SentenceAssembler
//! → ChatClient. Grounded directly on the reference engine's
//! `DictumEngine`/`pipeline::run` pairing: a lifecycle wrapper owning a
//! `Mutex<StreamState>` and a `broadcast::Sender` fanning out events for
//! observability and testing, plus a `tokio::spawn`-ed task for the pipeline
//! itself — async rather than `spawn_blocking` here, since this stream's
//! work is I/O-bound rather than CPU-bound like the reference engine's audio
//! capture.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::assembler::{AssemblerConfig, SentenceAssembler};
use crate::chat::{ChatClient, MessageContent};
use crate::media::MediaSource;
use crate::segmenter::{SegmenterConfig, VADSegmenter};
use crate::transcription::TranscriptionWorkerPool;
use crate::types::{Sentence, StreamState};
use crate::vad::EnergyVad;

const EVENT_BROADCAST_CAP: usize = 256;
const STOP_GRACE: Duration = Duration::from_secs(10);
const MAX_CONSECUTIVE_TRANSCRIPTION_FAILURES: u32 = 3;
const MAX_STALL: Duration = Duration::from_millis(3000);
const DROP_ESCALATION_WINDOW: Duration = Duration::from_secs(60);
const MAX_DROPS_IN_WINDOW: usize = 3;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    StateChanged { stream_id: String, state: StreamState },
    SentencePosted { stream_id: String, sentence: Sentence },
    Degraded { stream_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub stream_id: String,
    pub team_id: String,
    pub user_id: String,
    pub url: String,
    pub thread_id: String,
    pub language_hint: Option<String>,
    pub segmenter: SegmenterConfig,
    pub assembler: AssemblerConfig,
    pub aggressiveness: u8,
}

/// Owns one stream's lifecycle from `PENDING` to a terminal state.
pub struct StreamController {
    spec: StreamSpec,
    state: Mutex<StreamState>,
    cancel: CancellationToken,
    events_tx: broadcast::Sender<StreamEvent>,
    /// The composite `channel:ts` id `open_thread` minted for this stream's
    /// header. `ChatClient::post_in_thread`/`edit` both take this composite
    /// form, not the bare channel `spec.thread_id` started out as.
    thread_id: Mutex<Option<String>>,
    chat: Arc<dyn ChatClient>,
    media: Arc<dyn MediaSource>,
    pool: Arc<TranscriptionWorkerPool>,
    drop_history: Mutex<VecDeque<Instant>>,
}

impl StreamController {
    pub fn new(
        spec: StreamSpec,
        chat: Arc<dyn ChatClient>,
        media: Arc<dyn MediaSource>,
        pool: Arc<TranscriptionWorkerPool>,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAP);
        Arc::new(Self {
            spec,
            state: Mutex::new(StreamState::Pending),
            cancel: CancellationToken::new(),
            events_tx,
            thread_id: Mutex::new(None),
            chat,
            media,
            pool,
            drop_history: Mutex::new(VecDeque::new()),
        })
    }

    /// Record a dropped segment. Returns `true` once more than
    /// `MAX_DROPS_IN_WINDOW` drops have landed within `DROP_ESCALATION_WINDOW`.
    fn record_drop(&self) -> bool {
        let now = Instant::now();
        let mut history = self.drop_history.lock();
        history.push_back(now);
        while let Some(&front) = history.front() {
            if now.duration_since(front) > DROP_ESCALATION_WINDOW {
                history.pop_front();
            } else {
                break;
            }
        }
        history.len() > MAX_DROPS_IN_WINDOW
    }

    pub fn status(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn stream_id(&self) -> &str {
        &self.spec.stream_id
    }

    pub fn url(&self) -> &str {
        &self.spec.url
    }

    pub fn user_id(&self) -> &str {
        &self.spec.user_id
    }

    pub fn team_id(&self) -> &str {
        &self.spec.team_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    /// Post the header message and spawn the pipeline task. Returns once the
    /// header is posted; the pipeline itself runs in the background.
    #[instrument(skip(self, cookies), fields(stream_id = %self.spec.stream_id))]
    pub async fn start(self: &Arc<Self>, cookies: Option<Vec<u8>>) -> Result<(), crate::error::ChatError> {
        let channel = thread_channel(&self.spec.thread_id);
        let header = header_content(&self.spec.url, StreamState::Pending, None);
        let (thread_id, _ts) = self.chat.open_thread(channel, header).await?;
        *self.thread_id.lock() = Some(thread_id.clone());
        info!(thread_id, "stream header posted");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(cookies).await;
        });
        Ok(())
    }

    /// Signal graceful stop. The pipeline task observes cancellation,
    /// flushes its pending sentence, and transitions to `STOPPED`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: StreamState) {
        *self.state.lock() = state;
        let _ = self.events_tx.send(StreamEvent::StateChanged {
            stream_id: self.spec.stream_id.clone(),
            state,
        });
    }

    async fn edit_header(&self, state: StreamState, detail: Option<&str>) {
        let Some(thread_id) = self.thread_id.lock().clone() else {
            return;
        };
        let content = header_content(&self.spec.url, state, detail);
        if let Err(e) = self.chat.edit(&thread_id, content).await {
            warn!(error = %e, "failed to edit stream header");
        }
    }

    async fn post_sentence(&self, sentence: Sentence) {
        let Some(thread_id) = self.thread_id.lock().clone() else {
            warn!("sentence ready before thread header was posted, dropping");
            return;
        };
        let content = MessageContent::Text(sentence.text.clone());
        match self.chat.post_in_thread(&thread_id, content).await {
            Ok(_) => {
                let _ = self.events_tx.send(StreamEvent::SentencePosted {
                    stream_id: self.spec.stream_id.clone(),
                    sentence,
                });
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "sentence post exhausted retries");
            }
            Err(e) => {
                warn!(error = %e, "permanent post failure, failing stream");
                self.fail("post_failure", "posting failed permanently").await;
            }
        }
    }

    /// Transition to FAILED: edit the header, then post a separate error
    /// notice tagged by `classification` (§7's error taxonomy) — the header
    /// edit alone isn't the "error notice" §4.10 calls for.
    async fn fail(&self, classification: &str, reason: &str) {
        self.set_state(StreamState::Failed);
        self.edit_header(StreamState::Failed, Some(reason)).await;

        let Some(thread_id) = self.thread_id.lock().clone() else {
            return;
        };
        let notice = MessageContent::Text(format!("\u{26a0}\u{fe0f} {reason} ({classification})"));
        if let Err(e) = self.chat.post_in_thread(&thread_id, notice).await {
            warn!(error = %e, "failed to post error notice");
        }
    }

    /// Edit this (terminal) stream's header with a forward link to the
    /// StreamController that replaced it, after a `retry` command.
    pub async fn mark_superseded(&self, new_stream_id: &str) {
        let state = self.status();
        self.edit_header(state, Some(&format!("retried as {new_stream_id}"))).await;
    }

    #[instrument(skip(self, cookies), fields(stream_id = %self.spec.stream_id))]
    async fn run(self: Arc<Self>, cookies: Option<Vec<u8>>) {
        let mut stream = match self.media.open(&self.spec.url, cookies.as_deref()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "media source failed to start");
                let classification = media_failure_classification(&e);
                self.fail(classification, &format!("could not start media source: {e}")).await;
                return;
            }
        };

        self.set_state(StreamState::Running);
        self.edit_header(StreamState::Running, None).await;

        let mut segmenter = VADSegmenter::new(
            self.spec.stream_id.clone(),
            self.spec.segmenter,
            Box::new(EnergyVad::for_aggressiveness(self.spec.aggressiveness, 8)),
        );
        let mut assembler = SentenceAssembler::new(self.spec.stream_id.clone(), self.spec.assembler);
        let mut consecutive_transcription_failures = 0u32;
        let mut failed = false;
        let mut fail_reason = "too many consecutive transcription failures";
        let mut fail_classification = "transcription_error";

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_state(StreamState::Stopping);
                    break;
                }
                chunk = stream.next_chunk() => {
                    match chunk {
                        Some(bytes) => {
                            for segment in segmenter.push(&bytes) {
                                let seq = segment.seq;
                                let rx = self.pool.submit(segment.clone(), self.spec.language_hint.clone());
                                match tokio::time::timeout(MAX_STALL, rx).await {
                                    Ok(Ok(Ok(transcription))) => {
                                        consecutive_transcription_failures = 0;
                                        for sentence in assembler.push_fragment(
                                            &transcription.text,
                                            segment.start_ms,
                                            segment.end_ms,
                                            segment.preceding_silence_ms,
                                        ) {
                                            self.post_sentence(sentence).await;
                                        }
                                    }
                                    Ok(Ok(Err(e))) => {
                                        consecutive_transcription_failures += 1;
                                        warn!(seq, error = %e, "segment transcription failed");
                                        if consecutive_transcription_failures >= MAX_CONSECUTIVE_TRANSCRIPTION_FAILURES {
                                            failed = true;
                                        }
                                    }
                                    Ok(Err(_)) => {
                                        consecutive_transcription_failures += 1;
                                        warn!(seq, "transcription reply channel dropped");
                                        if consecutive_transcription_failures >= MAX_CONSECUTIVE_TRANSCRIPTION_FAILURES {
                                            failed = true;
                                        }
                                    }
                                    Err(_) => {
                                        // The pool stayed saturated past max_stall_ms: drop this
                                        // segment rather than desynchronize from the live source.
                                        warn!(seq, "pool stalled past max_stall_ms, dropping segment");
                                        let _ = self.events_tx.send(StreamEvent::Degraded {
                                            stream_id: self.spec.stream_id.clone(),
                                            reason: format!("dropped segment {seq} after stall"),
                                        });
                                        if self.record_drop() {
                                            fail_reason = "repeated segment drops from a stalled transcription pool";
                                            fail_classification = "pool_stalled";
                                            failed = true;
                                        }
                                    }
                                }
                                if failed {
                                    break;
                                }
                            }
                            if failed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        if failed {
            self.fail(fail_classification, fail_reason).await;
        } else {
            if let Some(sentence) = assembler.flush() {
                self.post_sentence(sentence).await;
            }
            if tokio::time::timeout(STOP_GRACE, stream.close()).await.is_err() {
                warn!("media source did not close within the grace window");
            }
            self.set_state(StreamState::Stopped);
            self.edit_header(StreamState::Stopped, None).await;
        }
    }
}

fn thread_channel(thread_id: &str) -> &str {
    thread_id.split(':').next().unwrap_or(thread_id)
}

fn media_failure_classification(err: &crate::error::MediaError) -> &'static str {
    use crate::error::{MediaError, MediaFailureKind};
    match err {
        MediaError::StartFailure { kind: MediaFailureKind::Auth, .. } => "auth",
        MediaError::StartFailure { kind: MediaFailureKind::NotFound, .. } => "not_found",
        MediaError::StartFailure { kind: MediaFailureKind::Network, .. } => "network",
        MediaError::StartFailure { kind: MediaFailureKind::Unavailable, .. } => "unavailable",
        MediaError::Io(_) => "io",
    }
}

fn header_content(url: &str, state: StreamState, detail: Option<&str>) -> MessageContent {
    let base = match state {
        StreamState::Pending => "\u{23f3} Starting\u{2026}",
        StreamState::Running => "\u{25b6}\u{fe0f} Running",
        StreamState::Stopping => "\u{23f8}\u{fe0f} Stopping\u{2026}",
        StreamState::Stopped => "\u{23f8}\u{fe0f} Stopped",
        StreamState::Failed => "\u{274c} Failed",
    };
    let status_line = match (state, detail) {
        (StreamState::Failed, Some(reason)) => format!("{base}: {reason}"),
        (_, Some(detail)) => format!("{base} ({detail})"),
        (_, None) => base.to_string(),
    };
    MessageContent::Text(format!("{url}\n{status_line}"))
}

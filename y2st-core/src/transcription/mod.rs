//! Speech model abstraction and the worker pool built on top of it.
//!
//! `&mut self` on `transcribe` expresses that decoders are stateful (beam
//! search caches, hidden states); all mutation is serialized through
//! `ModelHandle`'s `parking_lot::Mutex`, the same idiom as the reference
//! engine's inference handle.

pub mod echo;
pub mod pool;

pub use echo::EchoModel;
pub use pool::TranscriptionWorkerPool;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TranscriptionError;
use crate::types::{Segment, Transcription};

/// Contract for speech recognition backends.
pub trait SpeechModel: Send + 'static {
    /// Transcribe one speech segment. `language_hint` carries the user's
    /// configured preferred language, if any; implementations may ignore it
    /// and auto-detect instead.
    fn transcribe(
        &mut self,
        segment: &Segment,
        language_hint: Option<&str>,
    ) -> Result<Transcription, TranscriptionError>;
}

/// Thread-safe reference-counted handle to any `SpeechModel` implementor.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<Mutex<dyn SpeechModel>>);

impl ModelHandle {
    pub fn new<M: SpeechModel>(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

//! Voice Activity Detection (VAD) abstraction.
//!
//! `VoiceActivityDetector` is the extensibility seam: swap `EnergyVad`
//! (default, always available) for a neural detector later without
//! touching `VADSegmenter`.

pub mod energy;

pub use energy::EnergyVad;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations. Implementors may be stateful
/// (hangover counters, hidden states).
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one frame of mono 16-bit PCM samples at the stream's fixed
    /// sample rate.
    fn classify(&mut self, frame: &[i16]) -> VadDecision;

    fn reset(&mut self);
}

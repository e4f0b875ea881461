//! Energy-based VAD using RMS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming frame.
//! 2. If RMS ≥ `threshold` → emit `Speech`, reset hangover counter.
//! 3. If RMS < `threshold` and hangover counter > 0 → emit `Speech`,
//!    decrement counter (prevents clipping syllable endings).
//! 4. Otherwise → emit `Silence`.

use super::{VadDecision, VoiceActivityDetector};

/// RMS threshold (in i16 amplitude units) per aggressiveness band, least to
/// most strict. `a=0` flags almost any energy as speech; `a=3` requires a
/// clearly loud frame.
const THRESHOLD_BANDS: [f32; 4] = [150.0, 350.0, 700.0, 1400.0];

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    /// How many consecutive below-threshold frames to still emit `Speech`
    /// after real speech ends (prevents clipping word endings).
    hangover_frames: u32,
    hangover_counter: u32,
}

impl EnergyVad {
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    /// `aggressiveness` is clamped into `0..=3` and mapped onto
    /// `THRESHOLD_BANDS`; higher is stricter.
    pub fn for_aggressiveness(aggressiveness: u8, hangover_frames: u32) -> Self {
        let band = THRESHOLD_BANDS[aggressiveness.min(3) as usize];
        Self::new(band, hangover_frames)
    }

    fn rms(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        ((sum_sq / samples.len() as f64).sqrt()) as f32
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::for_aggressiveness(2, 8)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &[i16]) -> VadDecision {
        let rms = Self::rms(frame);

        if rms >= self.threshold {
            self.hangover_counter = self.hangover_frames;
            VadDecision::Speech
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}

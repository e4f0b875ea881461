//! `EchoModel` — placeholder backend that echoes metadata without real
//! inference, so the pipeline can be exercised end-to-end before a real STT
//! engine is wired in.

use crate::error::TranscriptionError;
use crate::types::{Segment, Transcription};

use super::SpeechModel;

pub struct EchoModel {
    utterance_count: u32,
}

impl EchoModel {
    pub fn new() -> Self {
        Self { utterance_count: 0 }
    }
}

impl Default for EchoModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechModel for EchoModel {
    fn transcribe(
        &mut self,
        segment: &Segment,
        language_hint: Option<&str>,
    ) -> Result<Transcription, TranscriptionError> {
        self.utterance_count += 1;
        let samples = segment.pcm.len() / 2;
        Ok(Transcription {
            stream_id: segment.stream_id.clone(),
            seq: segment.seq,
            text: format!("[echo #{}: {} samples]", self.utterance_count, samples),
            detected_language: language_hint.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(seq: u64) -> Segment {
        Segment {
            stream_id: "s1".to_string(),
            seq,
            start_ms: 0,
            end_ms: 500,
            pcm: vec![0u8; 16_000],
            language: None,
            preceding_silence_ms: None,
        }
    }

    #[test]
    fn echoes_sample_count_and_preserves_seq() {
        let mut model = EchoModel::new();
        let out = model.transcribe(&segment(3), Some("ja")).unwrap();
        assert_eq!(out.seq, 3);
        assert_eq!(out.detected_language.as_deref(), Some("ja"));
        assert!(out.text.contains("8000 samples"));
    }
}

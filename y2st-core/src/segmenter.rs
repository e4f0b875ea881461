//! `VADSegmenter` — turns a raw PCM byte stream into contiguous speech
//! [`Segment`]s, the way the reference engine's pipeline loop accumulates a
//! `speech_buf` and flushes it on silence or a length cap, generalized to
//! frame-counted pre/post padding and a hard maximum segment length.

use crate::types::Segment;
use crate::vad::{VadDecision, VoiceActivityDetector};

pub const SAMPLE_RATE_HZ: u32 = 16_000;

#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    pub frame_ms: u32,
    pub pre_pad_frames: u32,
    pub post_pad_frames: u32,
    pub min_segment_ms: u64,
    pub max_segment_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            frame_ms: 30,
            pre_pad_frames: 5,
            post_pad_frames: 10,
            min_segment_ms: 300,
            max_segment_ms: 20_000,
        }
    }
}

struct PendingShort {
    start_ms: u64,
    pcm: Vec<u8>,
    preceding_silence_ms: Option<u64>,
}

struct ActiveSegment {
    start_ms: u64,
    pcm: Vec<u8>,
    preceding_silence_ms: Option<u64>,
    post_silence_frames: u32,
}

/// Stateful wrapper around any [`VoiceActivityDetector`]. Feed it raw PCM
/// bytes with `push`; it buffers partial frames and returns every segment
/// completed by the bytes just fed in.
pub struct VADSegmenter {
    config: SegmenterConfig,
    vad: Box<dyn VoiceActivityDetector>,
    stream_id: String,
    frame_bytes: usize,
    leftover: Vec<u8>,
    current_ms: u64,
    next_seq: u64,
    silent_run_frames: u32,
    active: Option<ActiveSegment>,
    pending_short: Option<PendingShort>,
}

impl VADSegmenter {
    pub fn new(stream_id: String, config: SegmenterConfig, vad: Box<dyn VoiceActivityDetector>) -> Self {
        let samples_per_frame = (SAMPLE_RATE_HZ as u64 * config.frame_ms as u64 / 1000) as usize;
        Self {
            config,
            vad,
            stream_id,
            frame_bytes: samples_per_frame * 2,
            leftover: Vec::new(),
            current_ms: 0,
            next_seq: 0,
            silent_run_frames: config.pre_pad_frames,
            active: None,
            pending_short: None,
        }
    }

    /// Feed raw little-endian i16 PCM bytes. Returns every segment the new
    /// bytes completed, in order.
    pub fn push(&mut self, pcm: &[u8]) -> Vec<Segment> {
        self.leftover.extend_from_slice(pcm);
        let mut emitted = Vec::new();

        while self.leftover.len() >= self.frame_bytes {
            let frame_bytes: Vec<u8> = self.leftover.drain(..self.frame_bytes).collect();
            let frame = bytes_to_i16(&frame_bytes);
            let decision = self.vad.classify(&frame);
            emitted.extend(self.advance(decision, frame_bytes));
        }
        emitted
    }

    /// Force-finalize whatever is in flight at stream end. A dangling short
    /// burst that never got absorbed into a later segment is dropped.
    pub fn flush(&mut self) -> Option<Segment> {
        self.pending_short = None;
        self.active.take().and_then(|seg| self.finalize(seg))
    }

    fn advance(&mut self, decision: VadDecision, frame_bytes: Vec<u8>) -> Vec<Segment> {
        let mut emitted = Vec::new();
        let frame_ms = self.config.frame_ms as u64;

        match decision {
            VadDecision::Speech => {
                if self.active.is_none() {
                    if self.silent_run_frames >= self.config.pre_pad_frames {
                        self.start_segment(frame_bytes);
                    } else {
                        // Not enough preceding silence to trust this as a
                        // real onset; treat it as part of the silence run.
                        self.silent_run_frames += 1;
                        self.current_ms += frame_ms;
                        return emitted;
                    }
                } else {
                    let seg = self.active.as_mut().unwrap();
                    seg.pcm.extend_from_slice(&frame_bytes);
                    seg.post_silence_frames = 0;
                }
                self.silent_run_frames = 0;
                self.current_ms += frame_ms;

                if let Some(seg) = &self.active {
                    let duration_ms = self.current_ms - seg.start_ms;
                    if duration_ms >= self.config.max_segment_ms {
                        let seg = self.active.take().unwrap();
                        if let Some(segment) = self.finalize(seg) {
                            emitted.push(segment);
                        }
                        // Continue immediately: no silence gap at a forced cut.
                        self.active = Some(ActiveSegment {
                            start_ms: self.current_ms,
                            pcm: Vec::new(),
                            preceding_silence_ms: Some(0),
                            post_silence_frames: 0,
                        });
                    }
                }
            }
            VadDecision::Silence => {
                if let Some(seg) = self.active.as_mut() {
                    seg.pcm.extend_from_slice(&frame_bytes);
                    seg.post_silence_frames += 1;
                    if seg.post_silence_frames >= self.config.post_pad_frames {
                        let seg = self.active.take().unwrap();
                        self.silent_run_frames = seg.post_silence_frames;
                        if let Some(segment) = self.finalize(seg) {
                            emitted.push(segment);
                        }
                    }
                } else {
                    self.silent_run_frames = self.silent_run_frames.saturating_add(1);
                }
                self.current_ms += frame_ms;
            }
        }
        emitted
    }

    fn start_segment(&mut self, first_frame: Vec<u8>) {
        let fresh_silence_ms = self.silent_run_frames as u64 * self.config.frame_ms as u64;
        let (start_ms, pcm, preceding_silence_ms) = match self.pending_short.take() {
            Some(short) => {
                let mut pcm = short.pcm;
                pcm.extend_from_slice(&first_frame);
                (short.start_ms, pcm, short.preceding_silence_ms)
            }
            None => (self.current_ms, first_frame, Some(fresh_silence_ms)),
        };
        self.active = Some(ActiveSegment {
            start_ms,
            pcm,
            preceding_silence_ms,
            post_silence_frames: 0,
        });
    }

    fn finalize(&mut self, seg: ActiveSegment) -> Option<Segment> {
        let end_ms = self.current_ms;
        let duration_ms = end_ms - seg.start_ms;

        if duration_ms < self.config.min_segment_ms {
            self.pending_short = Some(PendingShort {
                start_ms: seg.start_ms,
                pcm: seg.pcm,
                preceding_silence_ms: seg.preceding_silence_ms,
            });
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        Some(Segment {
            stream_id: self.stream_id.clone(),
            seq,
            start_ms: seg.start_ms,
            end_ms,
            pcm: seg.pcm,
            language: None,
            preceding_silence_ms: seg.preceding_silence_ms,
        })
    }
}

fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

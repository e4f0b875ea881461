//! `SentenceAssembler` — pure-logic accumulation of transcript fragments
//! into user-visible [`Sentence`]s. No I/O, unit-tested exhaustively the way
//! the reference engine unit-tests its VAD.

use crate::types::Sentence;

const STRONG_TERMINATORS: &[char] = &['.', '?', '!', '。', '？', '！'];
const SOFT_TERMINATORS: &[char] = &[',', '、', ';', ':'];

#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    pub soft_len: usize,
    pub hard_len: usize,
    pub flush_silence_ms: u64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            soft_len: 120,
            hard_len: 400,
            flush_silence_ms: 1500,
        }
    }
}

pub struct SentenceAssembler {
    stream_id: String,
    cfg: AssemblerConfig,
    buf: String,
    frag_start_ms: Option<u64>,
    frag_end_ms: u64,
    ord: u64,
}

impl SentenceAssembler {
    pub fn new(stream_id: String, cfg: AssemblerConfig) -> Self {
        Self {
            stream_id,
            cfg,
            buf: String::new(),
            frag_start_ms: None,
            frag_end_ms: 0,
            ord: 0,
        }
    }

    /// Feed one transcribed fragment. `preceding_silence_ms` is VAD's
    /// measured silence immediately before this fragment's segment — the
    /// same measurement drives both VAD's `post_pad` and this assembler's
    /// `flush_silence_ms` rule, not two independent clocks.
    pub fn push_fragment(
        &mut self,
        text: &str,
        start_ms: u64,
        end_ms: u64,
        preceding_silence_ms: Option<u64>,
    ) -> Vec<Sentence> {
        let mut emitted = Vec::new();

        // Rule 3 takes priority: long silence flushes whatever was pending
        // before this fragment is appended.
        if preceding_silence_ms.unwrap_or(0) >= self.cfg.flush_silence_ms {
            if let Some(sentence) = self.flush() {
                emitted.push(sentence);
            }
        }

        if text.is_empty() {
            return emitted;
        }

        if self.frag_start_ms.is_none() {
            self.frag_start_ms = Some(start_ms);
        }
        if !self.buf.is_empty() && !self.buf.ends_with(char::is_whitespace) {
            self.buf.push(' ');
        }
        self.buf.push_str(text);
        self.frag_end_ms = end_ms;

        loop {
            if let Some(cut) = self.find_strong_terminator() {
                emitted.push(self.emit_through(cut));
                continue;
            }
            if self.buf.chars().count() > self.cfg.soft_len {
                if let Some(cut) = self.find_soft_terminator() {
                    emitted.push(self.emit_through(cut));
                    continue;
                }
            }
            if self.buf.chars().count() > self.cfg.hard_len {
                let cut = self.buf.len();
                emitted.push(self.emit_through(cut));
                continue;
            }
            break;
        }

        emitted
    }

    /// Force-emit whatever is buffered, e.g. at stream end. Returns `None`
    /// if the buffer is empty.
    pub fn flush(&mut self) -> Option<Sentence> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            self.frag_start_ms = None;
            return None;
        }
        Some(self.emit_through(self.buf.len()))
    }

    fn emit_through(&mut self, byte_cut: usize) -> Sentence {
        let text = self.buf[..byte_cut].trim().to_string();
        let rest = self.buf[byte_cut..].trim_start().to_string();
        let start_ms = self.frag_start_ms.unwrap_or(self.frag_end_ms);
        let end_ms = self.frag_end_ms;

        self.buf = rest;
        self.frag_start_ms = if self.buf.is_empty() { None } else { Some(end_ms) };

        let ord = self.ord;
        self.ord += 1;
        Sentence {
            stream_id: self.stream_id.clone(),
            ord,
            text,
            start_ms,
            end_ms,
        }
    }

    fn find_strong_terminator(&self) -> Option<usize> {
        self.find_terminator(STRONG_TERMINATORS)
    }

    fn find_soft_terminator(&self) -> Option<usize> {
        self.find_terminator(SOFT_TERMINATORS)
    }

    /// Byte offset just past the first boundary-qualifying terminator, or
    /// `None`. A terminator followed immediately by an alphanumeric,
    /// non-whitespace, non-quote character (e.g. the `.` in `example.com`)
    /// is not a boundary.
    fn find_terminator(&self, set: &[char]) -> Option<usize> {
        let chars: Vec<(usize, char)> = self.buf.char_indices().collect();
        for (i, &(byte_idx, ch)) in chars.iter().enumerate() {
            if !set.contains(&ch) {
                continue;
            }
            let next = chars.get(i + 1).map(|(_, c)| *c);
            let mid_token = next.map(|c| c.is_alphanumeric()).unwrap_or(false);
            if mid_token {
                continue;
            }
            let end = byte_idx + ch.len_utf8();
            return Some(end);
        }
        None
    }
}

//! # y2st-core
//!
//! Real-time transcription engine: ingest a live stream's audio, segment it
//! by voice activity, transcribe each segment, assemble sentences, and post
//! them into a chat-platform thread — scoped per user and per workspace.
//!
//! ## Architecture
//!
//! ```text
//! MediaSource → VADSegmenter → TranscriptionWorkerPool → SentenceAssembler → ChatClient
//!      │              │                  │                      │               │
//!  child proc    energy VAD        N worker threads        punctuation/     per-thread
//!  stdout PCM    + hangover        over a shared model      length/silence   post queue
//!                                                            boundaries
//! ```
//!
//! `StreamController` owns one stream's lifecycle end to end; `StreamRegistry`
//! enforces at-most-one-active-stream-per-user and `CommandRouter` translates
//! inbound commands into registry actions.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod assembler;
pub mod chat;
pub mod command;
pub mod config;
pub mod crypto;
pub mod error;
pub mod media;
pub mod registry;
pub mod segmenter;
pub mod store;
pub mod stream;
pub mod transcription;
pub mod types;
pub mod vad;
pub mod workspace_registry;

pub use assembler::{AssemblerConfig, SentenceAssembler};
pub use command::{Command, CommandOutcome, CommandRouter};
pub use config::{Config, Startup};
pub use crypto::SecretBox;
pub use registry::StreamRegistry;
pub use segmenter::{SegmenterConfig, VADSegmenter};
pub use stream::{StreamController, StreamEvent, StreamSpec};
pub use transcription::{ModelHandle, SpeechModel, TranscriptionWorkerPool};
pub use types::{Segment, Sentence, StreamState, Transcription, UserCookies, UserSettings, Workspace};
pub use vad::{EnergyVad, VadDecision, VoiceActivityDetector};
pub use workspace_registry::WorkspaceRegistry;

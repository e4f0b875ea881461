//! Data-model entities shared across stores, the registry, and the pipeline.

use serde::{Deserialize, Serialize};

/// Sentinel `team_id` used for single-workspace deployments and for legacy
/// rows migrated from a schema that predates multi-workspace support.
pub const DEFAULT_TEAM_ID: &str = "_default_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub team_id: String,
    pub team_name: String,
    pub bot_token: String,
    pub signing_secret: String,
    pub app_token: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCookies {
    pub team_id: String,
    pub user_id: String,
    pub cookies: Vec<u8>,
    pub updated_at: String,
}

/// Recognized settings. Unknown keys a caller round-trips through `extra`
/// are preserved but never interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UserSettings {
    pub preferred_language: String,
    pub whisper_model: WhisperModelSize,
    pub include_timestamps: bool,
    pub allow_local_whisper: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            preferred_language: "auto".to_string(),
            whisper_model: WhisperModelSize::Small,
            include_timestamps: false,
            allow_local_whisper: true,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Stopped | StreamState::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            StreamState::Pending | StreamState::Running | StreamState::Stopping
        )
    }
}

/// A contiguous span of speech emitted by VADSegmenter.
#[derive(Debug, Clone)]
pub struct Segment {
    pub stream_id: String,
    pub seq: u64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub pcm: Vec<u8>,
    pub language: Option<String>,
    /// Silence observed immediately before this segment began, in ms.
    /// `None` for the first segment of a stream.
    pub preceding_silence_ms: Option<u64>,
}

/// Raw model output for one Segment, preserving its `seq`.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub stream_id: String,
    pub seq: u64,
    pub text: String,
    pub detected_language: Option<String>,
}

/// A user-visible unit of posted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub stream_id: String,
    pub ord: u64,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

use thiserror::Error;

/// Fatal startup configuration problems. Always surfaces to stderr and a
/// non-zero exit code; never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("{0} must decode to a 32-byte key, got {1} bytes")]
    BadKeyLength(&'static str, usize),

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: figment::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// SecretBox seal/open failures.
#[derive(Debug, Error)]
pub enum SecretBoxError {
    #[error("ciphertext envelope is malformed or truncated")]
    MalformedEnvelope,

    #[error("authentication failed — ciphertext was tampered with or the key is wrong")]
    AuthFailure,

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// WorkspaceStore / UserSecretStore failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Secret(#[from] SecretBoxError),

    #[error("no row found for key {0}")]
    NotFound(String),
}

/// Classification of why a MediaSource failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFailureKind {
    Auth,
    NotFound,
    Network,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media source failed to start ({kind:?}): {message}")]
    StartFailure {
        kind: MediaFailureKind,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-segment transcription failures. Always non-fatal to the pool itself;
/// the caller decides whether repeated failures escalate a stream to FAILED.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("inference backend error: {0}")]
    Backend(String),

    #[error("worker pool is shut down")]
    PoolClosed,
}

/// Classification of ChatClient post/edit failures.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("authentication rejected by chat platform")]
    Auth,
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transient(_) | ChatError::RateLimited { .. })
    }
}

/// Errors a StreamController surfaces to its StreamRegistry/CommandRouter callers.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream is in state {0:?}, which does not accept this operation")]
    WrongState(crate::types::StreamState),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// User-facing command validation/authorization problems.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not parse a URL from the command")]
    MissingUrl,

    #[error("unrecognized command: {0}")]
    Unrecognized(String),

    #[error("you already have an active stream in this workspace")]
    DuplicateStream,

    #[error("no active stream to target")]
    NoActiveStream,

    #[error("workspace {0} is deactivated")]
    WorkspaceInactive(String),

    #[error("stream is not in a retryable state")]
    StreamNotRetryable,

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Store/registry invariant violations. Always user-visible, never a bug report.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("duplicate stream for (team_id={team_id}, user_id={user_id})")]
    DuplicateStream { team_id: String, user_id: String },
}

pub type Result<T, E> = std::result::Result<T, E>;

//! Startup configuration: a TOML file with `whisper`/`youtube`/`slack`/`vad`
//! sections plus a handful of named environment variables. The env vars here
//! don't share a common prefix, so unlike a plain `Env::prefixed(...)` merge
//! each one is read explicitly and layered onto the file-derived config.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::crypto::SecretBox;
use crate::error::ConfigError;

pub const DEFAULT_COOKIES_DB_PATH: &str = "user_cookies.db";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub vad: VadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    pub model: String,
    pub device: String,
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "small".to_string(),
            device: "cpu".to_string(),
            language: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    pub download_dir: String,
    pub format: String,
    pub keep_video: bool,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            download_dir: "/tmp/y2st".to_string(),
            format: "bestaudio".to_string(),
            keep_video: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub include_timestamps: bool,
    #[serde(default)]
    pub send_errors_to_slack: bool,
}

/// VAD tuning. Field names match §4.7/§4.9 of the spec exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub aggressiveness: u8,
    pub frame_ms: u32,
    pub flush_silence_ms: u64,
    pub soft_len: usize,
    pub hard_len: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: 2,
            frame_ms: 30,
            flush_silence_ms: 1_500,
            soft_len: 120,
            hard_len: 400,
        }
    }
}

/// Single-workspace environment fallback, used when no `Workspace` rows are
/// registered in `WorkspaceStore`.
#[derive(Debug, Clone)]
pub struct EnvWorkspaceFallback {
    pub bot_token: String,
    pub signing_secret: String,
    pub app_token: Option<String>,
}

/// Everything loaded once at process startup, outside of `Config` itself
/// because it is sourced from environment variables rather than the TOML
/// file and carries secret material.
pub struct Startup {
    pub config: Config,
    pub secret_box: SecretBox,
    pub cookies_db_path: PathBuf,
    pub env_workspace: Option<EnvWorkspaceFallback>,
}

impl Config {
    /// Load the TOML config file. Missing file is not an error — every
    /// section falls back to its documented default and unknown keys are
    /// preserved by `figment`'s extraction being tolerant of extra fields
    /// only insofar as they aren't type-mismatched; genuinely unknown
    /// top-level keys are simply never read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("config.toml")
    }
}

impl Startup {
    /// Load `Config` from `config_path` (or the default path, tolerating a
    /// missing file) and pull the required/optional environment variables.
    /// Fails fast — a missing `COOKIE_ENCRYPTION_KEY` or malformed key is a
    /// fatal `ConfigError`, never a deferred runtime failure.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Config::default_path);
        let config = Config::load(&path)?;

        let key_material = std::env::var("COOKIE_ENCRYPTION_KEY")
            .map_err(|_| ConfigError::MissingEnv("COOKIE_ENCRYPTION_KEY"))?;
        let secret_box = SecretBox::new(decode_key(&key_material)?);

        let cookies_db_path = std::env::var("USER_COOKIES_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_COOKIES_DB_PATH));

        let env_workspace = std::env::var("SLACK_BOT_TOKEN").ok().map(|bot_token| {
            EnvWorkspaceFallback {
                bot_token,
                signing_secret: std::env::var("SLACK_SIGNING_SECRET").unwrap_or_default(),
                app_token: std::env::var("SLACK_APP_TOKEN").ok(),
            }
        });

        Ok(Self {
            config,
            secret_box,
            cookies_db_path,
            env_workspace,
        })
    }
}

/// Accept either hex or base64 for `COOKIE_ENCRYPTION_KEY` — hex is tried
/// first since it is unambiguous (base64 alphabet overlaps with hex digits).
fn decode_key(raw: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(raw).or_else(|_| {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        STANDARD.decode(raw).map_err(|_| hex::FromHexError::InvalidStringLength)
    });

    let bytes = bytes.map_err(|_| ConfigError::BadKeyLength("COOKIE_ENCRYPTION_KEY", raw.len()))?;
    if bytes.len() != 32 {
        return Err(ConfigError::BadKeyLength("COOKIE_ENCRYPTION_KEY", bytes.len()));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

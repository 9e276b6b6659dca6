//! Configuration loading and validation.
//!
//! Loaded from `config.toml` (default location `~/.chatsync/config.toml`).
//! Environment variables override file values; file values override
//! defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Per-file upload cap (10 MiB).
const MAX_FILE_BYTES: u64 = 10_485_760;

/// Per-message upload cap (100 MiB).
const MAX_BATCH_BYTES: u64 = 104_857_600;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Who the local participant is.
    pub identity: IdentityConfig,

    /// Typing and sync tuning.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Client-side attachment limits.
    #[serde(default)]
    pub attachments: AttachmentLimits,

    /// Persistence service connection.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Local participant identity.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Participant id of the local user (coach or client).
    pub self_id: String,
}

/// Typing presence tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Inactivity window after which a local typing signal is withdrawn.
    #[serde(default = "default_typing_idle_ms")]
    pub typing_idle_ms: u64,
}

impl SyncConfig {
    /// Typing inactivity window as a [`Duration`].
    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_idle_ms: default_typing_idle_ms(),
        }
    }
}

/// Attachment size limits enforced before any send is attempted.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentLimits {
    /// Maximum size of a single file, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Maximum combined size of one message's files, in bytes.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: u64,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_batch_bytes: default_max_batch_bytes(),
        }
    }
}

/// REST persistence service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the chat API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// Default value functions for serde

fn default_typing_idle_ms() -> u64 {
    2000
}
fn default_max_file_bytes() -> u64 {
    MAX_FILE_BYTES
}
fn default_max_batch_bytes() -> u64 {
    MAX_BATCH_BYTES
}
fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/".to_owned()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Build a config with defaults for everything but the identity.
    pub fn for_participant(self_id: impl Into<String>) -> Self {
        Self {
            identity: IdentityConfig {
                self_id: self_id.into(),
            },
            sync: SyncConfig::default(),
            attachments: AttachmentLimits::default(),
            backend: BackendConfig::default(),
        }
    }

    /// Apply environment overrides through a resolver function.
    ///
    /// Takes a resolver so tests can inject values without touching the
    /// process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CHATSYNC_SELF_ID") {
            self.identity.self_id = v;
        }
        if let Some(v) = env("CHATSYNC_BACKEND_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = env("CHATSYNC_TYPING_IDLE_MS") {
            match v.parse() {
                Ok(n) => self.sync.typing_idle_ms = n,
                Err(_) => tracing::warn!(
                    var = "CHATSYNC_TYPING_IDLE_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.self_id.trim().is_empty() {
            anyhow::bail!("identity.self_id must not be empty");
        }
        if self.sync.typing_idle_ms == 0 {
            anyhow::bail!("sync.typing_idle_ms must be greater than zero");
        }
        if self.attachments.max_file_bytes > self.attachments.max_batch_bytes {
            anyhow::bail!(
                "attachments.max_file_bytes ({}) exceeds attachments.max_batch_bytes ({})",
                self.attachments.max_file_bytes,
                self.attachments.max_batch_bytes
            );
        }
        url::Url::parse(&self.backend.base_url).map_err(|e| {
            anyhow::anyhow!("backend.base_url {:?} is not a URL: {e}", self.backend.base_url)
        })?;
        Ok(())
    }
}

/// Load the config from a TOML file, apply env overrides and validate.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let mut config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Resolve the default config directory (`~/.chatsync/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".chatsync"))
}

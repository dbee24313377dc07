//! Configuration module for MirrorDrive.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{AccountSettings, RemotePath};

/// Default window, in seconds, within which a local and a remote timestamp
/// are considered equal when pairing files on first sync.
pub const DEFAULT_FIRST_SYNC_TOLERANCE_SECS: u64 = 60;

/// Upload sessions require chunk sizes that are a multiple of this (KiB).
pub const UPLOAD_CHUNK_ALIGNMENT_KB: u64 = 320;

/// Top-level configuration for MirrorDrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub transfers: TransfersConfig,
    pub conflicts: ConflictsConfig,
    pub accounts: AccountsConfig,
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
}

/// Synchronization loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between sync runs when nothing changes locally.
    pub poll_interval: u64,
    /// Seconds to wait after a local change before syncing (debounce).
    pub debounce_delay: u64,
    /// Glob patterns (matched against root-relative paths) never uploaded.
    pub exclude: Vec<String>,
    /// Path to the SQLite state database.
    pub database: PathBuf,
}

/// Transfer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransfersConfig {
    /// Files above this size (in MiB) are uploaded through an upload session.
    pub large_file_threshold_mb: u64,
    /// Size of each upload-session chunk (in KiB).
    pub chunk_size_kb: u64,
}

/// Conflict detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Timestamp tolerance used when pairing files on first sync.
    pub first_sync_tolerance_secs: u64,
}

/// Per-account tunables.
///
/// `defaults` applies to every account. `profiles` is keyed by the account's
/// external id and overrides individual fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub defaults: AccountSettings,
    pub profiles: HashMap<String, AccountProfile>,
}

/// Overrides for one account. Unset fields fall back to `accounts.defaults`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountProfile {
    pub display_name: Option<String>,
    /// Local directory mirrored for this account.
    pub local_root: Option<PathBuf>,
    /// Environment variable holding this account's access token.
    pub access_token_env: Option<String>,
    pub max_parallel_uploads: Option<usize>,
    pub max_parallel_downloads: Option<usize>,
    pub batch_size: Option<usize>,
    pub auto_sync_interval_secs: Option<u64>,
    pub detailed_logging: Option<bool>,
    pub selected_folders: Option<Vec<RemotePath>>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}

/// Remote drive endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the drive API.
    pub base_url: String,
    /// Environment variable holding the access token when a profile sets none.
    pub access_token_env: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/mirrordrive/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mirrordrive")
            .join("config.yaml")
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("mirrordrive");
        Self {
            poll_interval: 300,
            debounce_delay: 2,
            exclude: vec![
                "**/*.partial".to_string(),
                "**/.mirrordrive-*".to_string(),
                "**/~$*".to_string(),
            ],
            database: data_dir.join("state.db"),
        }
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            large_file_threshold_mb: 4,
            chunk_size_kb: 10 * UPLOAD_CHUNK_ALIGNMENT_KB,
        }
    }
}

impl TransfersConfig {
    pub fn large_file_threshold_bytes(&self) -> u64 {
        self.large_file_threshold_mb * 1024 * 1024
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_kb * 1024
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            first_sync_tolerance_secs: DEFAULT_FIRST_SYNC_TOLERANCE_SECS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            access_token_env: "MIRRORDRIVE_ACCESS_TOKEN".to_string(),
        }
    }
}

impl AccountsConfig {
    /// Effective settings for the account with the given external id.
    pub fn settings_for(&self, external_id: &str) -> AccountSettings {
        let mut settings = self.defaults.clone();
        let Some(profile) = self.profiles.get(external_id) else {
            return settings;
        };

        if let Some(n) = profile.max_parallel_uploads {
            settings.max_parallel_uploads = n;
        }
        if let Some(n) = profile.max_parallel_downloads {
            settings.max_parallel_downloads = n;
        }
        if let Some(n) = profile.batch_size {
            settings.batch_size = n;
        }
        if let Some(secs) = profile.auto_sync_interval_secs {
            settings.auto_sync_interval_secs = secs;
        }
        if let Some(detailed) = profile.detailed_logging {
            settings.detailed_logging = detailed;
        }
        if let Some(folders) = &profile.selected_folders {
            settings.selected_folders = folders.clone();
        }
        settings
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: String| {
            errors.push(ValidationError { field, message });
        };

        // --- sync ---
        if self.sync.poll_interval == 0 {
            push("sync.poll_interval".into(), "must be greater than 0".into());
        }
        if self.sync.debounce_delay == 0 {
            push("sync.debounce_delay".into(), "must be greater than 0".into());
        }
        if self.sync.exclude.iter().any(|p| p.trim().is_empty()) {
            push("sync.exclude".into(), "patterns must not be empty".into());
        }

        // --- transfers ---
        if self.transfers.large_file_threshold_mb == 0 {
            push(
                "transfers.large_file_threshold_mb".into(),
                "must be greater than 0".into(),
            );
        }
        if self.transfers.chunk_size_kb == 0
            || self.transfers.chunk_size_kb % UPLOAD_CHUNK_ALIGNMENT_KB != 0
        {
            push(
                "transfers.chunk_size_kb".into(),
                format!(
                    "must be a positive multiple of {UPLOAD_CHUNK_ALIGNMENT_KB} (got {})",
                    self.transfers.chunk_size_kb
                ),
            );
        }

        // --- conflicts ---
        if self.conflicts.first_sync_tolerance_secs > 24 * 60 * 60 {
            push(
                "conflicts.first_sync_tolerance_secs".into(),
                "must not exceed one day".into(),
            );
        }

        // --- accounts ---
        if let Err(e) = self.accounts.defaults.validate() {
            push("accounts.defaults".into(), e.to_string());
        }
        let mut external_ids: Vec<&String> = self.accounts.profiles.keys().collect();
        external_ids.sort();
        for external_id in external_ids {
            if let Err(e) = self.accounts.settings_for(external_id).validate() {
                push(format!("accounts.profiles.{external_id}"), e.to_string());
            }
            if let Some(root) = self
                .accounts
                .profiles
                .get(external_id)
                .and_then(|p| p.local_root.as_ref())
            {
                if !root.is_absolute() {
                    push(
                        format!("accounts.profiles.{external_id}.local_root"),
                        format!("must be an absolute path: {}", root.display()),
                    );
                }
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level".into(),
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        // --- remote ---
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            push(
                "remote.base_url".into(),
                format!("not an http(s) URL: {}", self.remote.base_url),
            );
        }
        if self.remote.access_token_env.trim().is_empty() {
            push(
                "remote.access_token_env".into(),
                "must name an environment variable".into(),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use mirrordrive_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_poll_interval(60)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_debounce_delay(mut self, seconds: u64) -> Self {
        self.config.sync.debounce_delay = seconds;
        self
    }

    pub fn sync_exclude(mut self, patterns: Vec<String>) -> Self {
        self.config.sync.exclude = patterns;
        self
    }

    pub fn sync_database(mut self, path: PathBuf) -> Self {
        self.config.sync.database = path;
        self
    }

    // --- transfers ---

    pub fn transfers_large_file_threshold_mb(mut self, mb: u64) -> Self {
        self.config.transfers.large_file_threshold_mb = mb;
        self
    }

    pub fn transfers_chunk_size_kb(mut self, kb: u64) -> Self {
        self.config.transfers.chunk_size_kb = kb;
        self
    }

    // --- conflicts ---

    pub fn conflicts_first_sync_tolerance_secs(mut self, secs: u64) -> Self {
        self.config.conflicts.first_sync_tolerance_secs = secs;
        self
    }

    // --- accounts ---

    pub fn account_defaults(mut self, settings: AccountSettings) -> Self {
        self.config.accounts.defaults = settings;
        self
    }

    pub fn account_profile(mut self, external_id: impl Into<String>, profile: AccountProfile) -> Self {
        self.config.accounts.profiles.insert(external_id.into(), profile);
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_access_token_env(mut self, name: impl Into<String>) -> Self {
        self.config.remote.access_token_env = name.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

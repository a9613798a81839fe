//! Configuration file parser for ~/.config/localfeed/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FeedSettings, DEFAULT_ANNOTATION_CAPACITY};

/// Environment variable overriding `api_key` from the file.
pub const API_KEY_ENV: &str = "LOCALFEED_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `Debug` masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Items requested per remote page.
    pub page_size: usize,

    /// Maximum items kept locally per filter key. Raised to `page_size`
    /// when configured lower.
    pub max_cached_items: usize,

    /// Minutes before a loaded filter key is considered stale.
    pub cache_expiry_minutes: u64,

    /// Number of user annotations kept in memory.
    pub annotation_cache_capacity: usize,

    /// Base URL of the feed backend.
    pub backend_url: String,

    /// Backend API key (alternative to the LOCALFEED_API_KEY env var).
    /// Env var takes precedence over config file.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Directory of temporary media cleared on refresh.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let settings = FeedSettings::default();
        Self {
            page_size: settings.page_size,
            max_cached_items: settings.max_cached_items,
            cache_expiry_minutes: settings.cache_expiry_minutes,
            annotation_cache_capacity: DEFAULT_ANNOTATION_CAPACITY,
            backend_url: "http://localhost:8080".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            scratch_dir: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("page_size", &self.page_size)
            .field("max_cached_items", &self.max_cached_items)
            .field("cache_expiry_minutes", &self.cache_expiry_minutes)
            .field("annotation_cache_capacity", &self.annotation_cache_capacity)
            .field("backend_url", &self.backend_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "page_size",
        "max_cached_items",
        "cache_expiry_minutes",
        "annotation_cache_capacity",
        "backend_url",
        "api_key",
        "request_timeout_secs",
        "scratch_dir",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            page_size = config.page_size,
            max_cached_items = config.max_cached_items,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Controller settings with `max_cached_items` raised to `page_size`.
    pub fn feed_settings(&self) -> FeedSettings {
        let settings = FeedSettings {
            page_size: self.page_size,
            max_cached_items: self.max_cached_items,
            cache_expiry_minutes: self.cache_expiry_minutes,
        }
        .normalized();
        if settings.max_cached_items != self.max_cached_items {
            tracing::warn!(
                configured = self.max_cached_items,
                effective = settings.max_cached_items,
                "max_cached_items below page_size, raised"
            );
        }
        settings
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// API key from the environment, falling back to the config file.
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        self.api_key_with_override(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_override(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|key| !key.trim().is_empty()))
            .map(SecretString::from)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Configuration loading and parsing.
//!
//! Defines the TOML config schema and resolves defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable that overrides `youtube_api_key`.
pub const API_KEY_ENV: &str = "YOUTUBE_API_KEY";

/// Top-level application configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Catalog search API key.
    pub youtube_api_key: Option<String>,
    /// Bias searches toward music and filter titles (default: true).
    pub music_filter: Option<bool>,
    /// Volume applied before the first stream loads (default: 50).
    pub initial_volume: Option<u8>,
    /// Progress tick interval in milliseconds (default: 500).
    pub tick_interval_ms: Option<u64>,
    /// Per-request search timeout in milliseconds (default: 10000).
    pub search_timeout_ms: Option<u64>,
    /// Per-attempt resolution timeout in milliseconds (default: 30000).
    pub resolve_timeout_ms: Option<u64>,
    /// Extra resolution attempts after a retryable failure (default: 1).
    pub resolve_retries: Option<u32>,
    /// Path or name of the yt-dlp executable.
    pub ytdlp_path: Option<String>,
    /// Path or name of the mpv executable.
    pub mpv_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from disk. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = ?path, "config file not found; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Replace the API key with the environment override when it is set.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.youtube_api_key = normalize(Some(key));
        }
    }

    /// API key, trimmed; `None` when absent or blank.
    pub fn api_key(&self) -> Option<String> {
        normalize(self.youtube_api_key.clone())
    }

    pub fn music_filter(&self) -> bool {
        self.music_filter.unwrap_or(true)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms.unwrap_or(10_000))
    }

    pub fn ytdlp_path(&self) -> PathBuf {
        PathBuf::from(self.ytdlp_path.as_deref().unwrap_or("yt-dlp"))
    }

    pub fn mpv_path(&self) -> PathBuf {
        PathBuf::from(self.mpv_path.as_deref().unwrap_or("mpv"))
    }

    /// Derive the controller settings.
    pub fn session(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            tick_interval: self
                .tick_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            resolve_timeout: self
                .resolve_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.resolve_timeout),
            resolve_retries: self.resolve_retries.unwrap_or(defaults.resolve_retries),
            initial_volume: self
                .initial_volume
                .map(|v| v.min(100))
                .unwrap_or(defaults.initial_volume),
        }
    }
}

/// Timing and playback tuning for the session controller.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Delay between the end of one progress tick and the next.
    pub tick_interval: Duration,
    /// Upper bound on a single resolution attempt.
    pub resolve_timeout: Duration,
    /// Extra attempts after a retryable resolution failure.
    pub resolve_retries: u32,
    /// Volume applied to the engine on startup and after each load.
    pub initial_volume: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            resolve_timeout: Duration::from_secs(30),
            resolve_retries: 1,
            initial_volume: 50,
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

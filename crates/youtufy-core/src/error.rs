//! Error types for the session core.
//!
//! Every failure is handled by the session controller and mapped to a state
//! transition; none of them terminate the process.

use std::path::PathBuf;

use thiserror::Error;
use youtufy_types::FailureKind;

/// Catalog search failures.
#[derive(Error, Debug)]
pub enum SearchError {
    /// No API key was configured.
    #[error("search API key is not configured")]
    MissingApiKey,

    /// Network or TLS failure talking to the catalog.
    #[error("search request failed: {0}")]
    Transport(String),

    /// The catalog answered with a non-success HTTP status.
    #[error("search returned HTTP {0}")]
    Status(u16),

    /// The response body was not the expected JSON shape.
    #[error("malformed search response: {0}")]
    Parse(String),
}

/// Stream resolution failures.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The extractor could not be started.
    #[error("failed to start extractor: {0}")]
    Spawn(String),

    /// The extractor ran but could not produce a stream.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The content is private, removed, or region-blocked.
    #[error("content unavailable: {0}")]
    Unavailable(String),

    /// The extractor output could not be decoded.
    #[error("malformed extractor output: {0}")]
    Parse(String),

    /// The attempt exceeded its time budget.
    #[error("resolution timed out after {0} ms")]
    Timeout(u64),
}

impl ResolveError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::Spawn(_) | ResolveError::Extraction(_) | ResolveError::Timeout(_)
        )
    }
}

/// Media backend failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The backend process could not be started or reached.
    #[error("failed to start media backend: {0}")]
    Spawn(String),

    /// Reading or writing the control channel failed.
    #[error("media backend IPC error: {0}")]
    Ipc(String),

    /// The backend refused the command.
    #[error("media backend rejected {command}: {reason}")]
    Rejected { command: String, reason: String },

    /// The backend went away.
    #[error("media backend closed")]
    Closed,
}

/// Preview image fetch failures.
#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("preview request failed: {0}")]
    Transport(String),

    #[error("no preview image available for {0}")]
    NotFound(String),
}

/// The session controller thread has exited.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session controller is not running")]
pub struct SessionClosed;

/// Configuration file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl From<&SearchError> for FailureKind {
    fn from(_: &SearchError) -> Self {
        FailureKind::Search
    }
}

impl From<&ResolveError> for FailureKind {
    fn from(_: &ResolveError) -> Self {
        FailureKind::Resolution
    }
}

impl From<&EngineError> for FailureKind {
    fn from(_: &EngineError) -> Self {
        FailureKind::Engine
    }
}

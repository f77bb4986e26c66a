use serde::{Deserialize, Serialize};

/// One catalog hit returned by a search.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    /// Display title with HTML entities already decoded.
    pub title: String,
    /// Catalog content identifier (video id).
    pub content_id: String,
    /// Thumbnail URL reported by the search response.
    pub preview_image_ref: String,
}

/// A playable stream produced by the resolver for one content id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedStream {
    /// Direct, time-limited audio URL.
    pub stream_locator: String,
    /// Canonical title reported by the extractor.
    pub title: String,
    /// Content id this stream was resolved for.
    pub content_id: String,
}

/// Position/duration pair sampled from the engine for display.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Current position in milliseconds, never above `duration_ms` once the duration is known.
    pub position_ms: u64,
    /// Total media duration in milliseconds.
    pub duration_ms: u64,
}

impl ProgressSnapshot {
    /// Integer 0..=100 position, as shown on a progress slider.
    pub fn percent(&self) -> u8 {
        if self.duration_ms == 0 {
            return 0;
        }
        let pct = self.position_ms.min(self.duration_ms).saturating_mul(100) / self.duration_ms;
        pct as u8
    }
}

/// Observable name of the session's playback state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Waiting for a stream locator.
    Resolving,
    /// Media handed to the engine, playback not yet started.
    Loaded,
    Playing,
    Paused,
    /// A seek drag or jump is in flight.
    Seeking,
    /// The last stream played to its end.
    Ended,
}

/// Which collaborator a reported failure came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Catalog search transport or parse failure.
    Search,
    /// Stream extraction, availability, or transport failure.
    Resolution,
    /// Media backend rejected a load/play/seek command.
    Engine,
}

/// Session-level status snapshot published on every state change.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state name.
    pub phase: PlaybackPhase,
    /// Content id being resolved or played, if any.
    pub content_id: Option<String>,
    /// Title of the loaded stream, if any.
    pub title: Option<String>,
    /// Selected result waiting for activation.
    pub pending_selection: Option<String>,
    /// Last volume applied to the engine (0..=100).
    pub volume: u8,
}

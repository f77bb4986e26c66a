//! Playback engine abstraction.
//!
//! The session drives a media backend only through this trait; decoding and
//! audio output stay inside the backend.

use crate::error::EngineError;

/// Callback invoked from the engine's own context when a stream plays to its end.
pub type EndReachedCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Callback invoked from the engine's own context when the media fails asynchronously.
pub type EngineErrorCallback = Box<dyn Fn(String) + Send + Sync + 'static>;

/// Media backend contract.
///
/// Implementations must raise the end-reached callback exactly once per
/// completed stream and report a non-decreasing position between seeks.
pub trait PlaybackEngine: Send {
    /// Replace the current media with `locator`. Does not start playback.
    fn load(&mut self, locator: &str) -> Result<(), EngineError>;
    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self) -> Result<(), EngineError>;
    /// Stop playback and release the loaded media.
    fn stop(&mut self) -> Result<(), EngineError>;
    /// Set output volume in percent (0..=100).
    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError>;
    /// Current position; `0` when nothing is loaded.
    fn position_ms(&mut self) -> Result<u64, EngineError>;
    /// Media duration; `0` while unknown.
    fn duration_ms(&mut self) -> Result<u64, EngineError>;
    fn seek_to_ms(&mut self, ms: u64) -> Result<(), EngineError>;
    /// Register the end-of-stream callback, replacing any previous one.
    fn on_end_reached(&mut self, callback: EndReachedCallback);
    /// Register the callback for failures not tied to a command, such as a load that fails later.
    fn on_engine_error(&mut self, callback: EngineErrorCallback);
}

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
#[cfg(unix)]
pub mod mpv;
pub mod preview;
pub mod progress;
pub mod resolver;
pub mod search;
pub mod session;

pub use controller::{SessionCommand, SessionController, SessionHandle};
pub use engine::PlaybackEngine;
pub use events::SessionEvent;

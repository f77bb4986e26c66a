//! Session event bus.
//!
//! The controller is the only producer; front ends drain the receiver.

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use youtufy_types::{FailureKind, ProgressSnapshot, SessionStatus};

/// Events published by the session controller.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The playback state changed.
    StateChanged(SessionStatus),
    /// A new position/duration sample is available for display.
    Progress(ProgressSnapshot),
    /// A stream was resolved and handed to the engine.
    NowPlaying { content_id: String, title: String },
    /// The pending selection changed without a state transition.
    SelectionChanged { content_id: Option<String> },
    /// A collaborator failed; the state machine already moved to a safe state.
    Failure { kind: FailureKind, message: String },
}

#[derive(Clone)]
pub struct EventSink {
    sender: Sender<SessionEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("session event dropped; no subscribers");
        }
    }

    pub fn state_changed(&self, status: SessionStatus) {
        self.emit(SessionEvent::StateChanged(status));
    }

    pub fn progress(&self, snapshot: ProgressSnapshot) {
        self.emit(SessionEvent::Progress(snapshot));
    }

    pub fn failure(&self, kind: FailureKind, message: impl Into<String>) {
        self.emit(SessionEvent::Failure {
            kind,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.progress(ProgressSnapshot::default());
    }

    #[test]
    fn failure_event_serializes_with_event_tag() {
        let event = SessionEvent::Failure {
            kind: FailureKind::Resolution,
            message: "private video".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "failure");
        assert_eq!(json["kind"], "resolution");
        assert_eq!(json["message"], "private video");
    }
}

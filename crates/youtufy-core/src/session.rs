//! Playback session state machine.
//!
//! `Session` owns the single `PlaybackState` and the engine. Every mutation is
//! a method call made from one context (the controller thread, or a test), so
//! the state is never observed half-updated.

use youtufy_types::{FailureKind, PlaybackPhase, ProgressSnapshot, ResolvedStream, SessionStatus};

use crate::engine::PlaybackEngine;
use crate::error::ResolveError;
use crate::events::{EventSink, SessionEvent};
use crate::progress;

/// Mode a seek returns to once applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeMode {
    Playing,
    Paused,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackState {
    Idle,
    /// Waiting on resolution `seq` for `content_id`.
    Resolving { content_id: String, seq: u64 },
    Loaded(ResolvedStream),
    Playing(ResolvedStream),
    Paused(ResolvedStream),
    /// `target` is `None` while the user is still dragging.
    Seeking {
        stream: ResolvedStream,
        target: Option<f64>,
        resume: ResumeMode,
    },
    Ended,
}

impl PlaybackState {
    pub fn phase(&self) -> PlaybackPhase {
        match self {
            PlaybackState::Idle => PlaybackPhase::Idle,
            PlaybackState::Resolving { .. } => PlaybackPhase::Resolving,
            PlaybackState::Loaded(_) => PlaybackPhase::Loaded,
            PlaybackState::Playing(_) => PlaybackPhase::Playing,
            PlaybackState::Paused(_) => PlaybackPhase::Paused,
            PlaybackState::Seeking { .. } => PlaybackPhase::Seeking,
            PlaybackState::Ended => PlaybackPhase::Ended,
        }
    }

    /// The stream the engine currently holds, if any.
    pub fn stream(&self) -> Option<&ResolvedStream> {
        match self {
            PlaybackState::Loaded(s) | PlaybackState::Playing(s) | PlaybackState::Paused(s) => {
                Some(s)
            }
            PlaybackState::Seeking { stream, .. } => Some(stream),
            _ => None,
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        match self {
            PlaybackState::Resolving { content_id, .. } => Some(content_id),
            other => other.stream().map(|s| s.content_id.as_str()),
        }
    }
}

/// Resolution work the caller must run off-context after an activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveTicket {
    pub seq: u64,
    pub content_id: String,
}

pub struct Session<E: PlaybackEngine> {
    engine: E,
    events: EventSink,
    state: PlaybackState,
    activation_seq: u64,
    pending_selection: Option<String>,
    last_content_id: Option<String>,
    volume: u8,
    progress_seen: bool,
    media_failed: bool,
}

impl<E: PlaybackEngine> Session<E> {
    pub fn new(mut engine: E, events: EventSink, volume: u8) -> Self {
        let volume = volume.min(100);
        if let Err(e) = engine.set_volume(volume) {
            tracing::warn!(error = %e, "initial volume not applied");
        }
        Self {
            engine,
            events,
            state: PlaybackState::Idle,
            activation_seq: 0,
            pending_selection: None,
            last_content_id: None,
            volume,
            progress_seen: false,
            media_failed: false,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.state.phase(),
            content_id: self.state.content_id().map(str::to_string),
            title: self.state.stream().map(|s| s.title.clone()),
            pending_selection: self.pending_selection.clone(),
            volume: self.volume,
        }
    }

    /// Whether the progress tick should stay armed.
    pub fn wants_ticks(&self) -> bool {
        matches!(
            self.state,
            PlaybackState::Playing(_) | PlaybackState::Paused(_) | PlaybackState::Seeking { .. }
        )
    }

    /// Record a browsed result. Never changes the playback state.
    pub fn select(&mut self, content_id: String) {
        if self.pending_selection.as_deref() == Some(content_id.as_str()) {
            return;
        }
        tracing::debug!(content_id = %content_id, "selection changed");
        self.pending_selection = Some(content_id.clone());
        self.events.emit(SessionEvent::SelectionChanged {
            content_id: Some(content_id),
        });
    }

    /// Start resolving `content_id`, superseding any in-flight resolution or seek.
    pub fn activate(&mut self, content_id: String) -> Option<ResolveTicket> {
        if let Some(stream) = self.state.stream() {
            if stream.content_id == content_id
                && !self.media_failed
                && !matches!(self.state, PlaybackState::Loaded(_))
            {
                tracing::debug!(content_id = %content_id, "already loaded; activation ignored");
                self.clear_pending_if(&content_id);
                return None;
            }
        }
        if self.state.stream().is_some() || matches!(self.state, PlaybackState::Ended) {
            if let Err(e) = self.engine.stop() {
                tracing::warn!(error = %e, "engine stop failed while switching streams");
            }
        }

        self.activation_seq += 1;
        let seq = self.activation_seq;
        self.clear_pending_if(&content_id);
        self.last_content_id = Some(content_id.clone());
        tracing::info!(content_id = %content_id, seq, "activation");
        self.transition(PlaybackState::Resolving {
            content_id: content_id.clone(),
            seq,
        });
        Some(ResolveTicket { seq, content_id })
    }

    /// Play/pause button: activate the pending selection, else toggle the current stream.
    pub fn toggle(&mut self) -> Option<ResolveTicket> {
        if let Some(content_id) = self.pending_selection.clone() {
            return self.activate(content_id);
        }
        match self.state {
            PlaybackState::Playing(_) => {
                self.pause();
                None
            }
            PlaybackState::Paused(_) => {
                self.resume();
                None
            }
            PlaybackState::Ended => {
                let last = self.last_content_id.clone()?;
                self.activate(last)
            }
            _ => None,
        }
    }

    /// Apply the outcome of resolution `seq`. Outcomes for superseded activations are dropped.
    pub fn on_resolved(&mut self, seq: u64, result: Result<ResolvedStream, ResolveError>) {
        let expected = match &self.state {
            PlaybackState::Resolving {
                content_id,
                seq: current,
            } if *current == seq => content_id.clone(),
            _ => {
                tracing::debug!(seq, latest = self.activation_seq, "stale resolution discarded");
                return;
            }
        };

        match result {
            Ok(stream) if stream.content_id == expected => self.start_stream(stream),
            Ok(stream) => {
                tracing::warn!(
                    expected = %expected,
                    got = %stream.content_id,
                    "resolver returned a stream for another id"
                );
                self.events.failure(
                    FailureKind::Resolution,
                    format!("resolver returned {} for {expected}", stream.content_id),
                );
                self.transition(PlaybackState::Idle);
            }
            Err(e) => {
                tracing::warn!(content_id = %expected, error = %e, "resolution failed");
                self.events.failure(FailureKind::from(&e), e.to_string());
                self.transition(PlaybackState::Idle);
            }
        }
    }

    fn start_stream(&mut self, stream: ResolvedStream) {
        if let Err(e) = self.engine.load(&stream.stream_locator) {
            tracing::warn!(content_id = %stream.content_id, error = %e, "engine load failed");
            self.events.failure(FailureKind::from(&e), e.to_string());
            self.transition(PlaybackState::Idle);
            return;
        }
        self.state = PlaybackState::Loaded(stream.clone());
        self.progress_seen = false;
        self.media_failed = false;
        if let Err(e) = self.engine.set_volume(self.volume) {
            tracing::warn!(error = %e, "volume not reapplied after load");
        }
        self.events.emit(SessionEvent::NowPlaying {
            content_id: stream.content_id.clone(),
            title: stream.title.clone(),
        });
        match self.engine.play() {
            Ok(()) => self.transition(PlaybackState::Playing(stream)),
            Err(e) => {
                tracing::warn!(content_id = %stream.content_id, error = %e, "engine play failed");
                self.events.failure(FailureKind::from(&e), e.to_string());
                self.transition(PlaybackState::Paused(stream));
            }
        }
    }

    pub fn pause(&mut self) {
        match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Playing(stream) => {
                if let Err(e) = self.engine.pause() {
                    self.engine_failure(e);
                }
                self.transition(PlaybackState::Paused(stream));
            }
            PlaybackState::Seeking {
                stream,
                target,
                resume: ResumeMode::Playing,
            } => {
                if let Err(e) = self.engine.pause() {
                    self.engine_failure(e);
                }
                self.state = PlaybackState::Seeking {
                    stream,
                    target,
                    resume: ResumeMode::Paused,
                };
            }
            other => self.state = other,
        }
    }

    pub fn resume(&mut self) {
        match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Paused(stream) => match self.engine.play() {
                Ok(()) => self.transition(PlaybackState::Playing(stream)),
                Err(e) => {
                    self.state = PlaybackState::Paused(stream);
                    self.engine_failure(e);
                }
            },
            other => self.state = other,
        }
    }

    /// First phase of a seek: suppress progress publication while the user drags.
    pub fn seek_begin(&mut self) {
        let next = match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Playing(stream) => PlaybackState::Seeking {
                stream,
                target: None,
                resume: ResumeMode::Playing,
            },
            PlaybackState::Paused(stream) => PlaybackState::Seeking {
                stream,
                target: None,
                resume: ResumeMode::Paused,
            },
            other => {
                self.state = other;
                return;
            }
        };
        self.transition(next);
    }

    /// Second phase of a seek: jump to `fraction` of the duration and publish once.
    pub fn seek_commit(&mut self, fraction: f64) -> Option<ProgressSnapshot> {
        let (stream, resume) = match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Playing(stream) => (stream, ResumeMode::Playing),
            PlaybackState::Paused(stream) => (stream, ResumeMode::Paused),
            PlaybackState::Seeking { stream, resume, .. } => (stream, resume),
            other => {
                tracing::debug!(phase = ?other.phase(), "seek commit without a loaded stream ignored");
                self.state = other;
                return None;
            }
        };
        self.state = PlaybackState::Seeking {
            stream: stream.clone(),
            target: Some(fraction),
            resume,
        };

        let duration_ms = self.engine.duration_ms().unwrap_or(0);
        let target_ms = progress::seek_target_ms(fraction, duration_ms);
        let mut resume = resume;
        if duration_ms > 0 {
            tracing::debug!(fraction, target_ms, duration_ms, "seek applied");
            if let Err(e) = self.engine.seek_to_ms(target_ms) {
                self.engine_failure(e);
                if resume == ResumeMode::Playing {
                    if let Err(e) = self.engine.pause() {
                        tracing::debug!(error = %e, "pause after failed seek also failed");
                    }
                }
                resume = ResumeMode::Paused;
            }
        }

        let next = match resume {
            ResumeMode::Playing => PlaybackState::Playing(stream),
            ResumeMode::Paused => PlaybackState::Paused(stream),
        };
        self.transition(next);
        self.publish_progress()
    }

    /// Periodic progress sample. Publishes only while playing or paused.
    pub fn tick(&mut self) -> Option<ProgressSnapshot> {
        self.publish_progress()
    }

    fn publish_progress(&mut self) -> Option<ProgressSnapshot> {
        if !matches!(
            self.state,
            PlaybackState::Playing(_) | PlaybackState::Paused(_)
        ) {
            return None;
        }
        let duration_ms = match self.engine.duration_ms() {
            Ok(d) if d > 0 => d,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "duration unavailable");
                return None;
            }
        };
        let position_ms = match self.engine.position_ms() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "position unavailable");
                return None;
            }
        };
        let snap = progress::snapshot(position_ms, duration_ms);
        self.progress_seen = true;
        self.events.progress(snap);
        Some(snap)
    }

    /// Engine reported end of stream. Only a playing stream can end.
    pub fn end_reached(&mut self) {
        if let PlaybackState::Playing(stream) = &self.state {
            tracing::info!(content_id = %stream.content_id, "end of stream");
            self.transition(PlaybackState::Ended);
        } else {
            tracing::debug!(phase = ?self.state.phase(), "end-of-stream ignored");
        }
    }

    /// Asynchronous engine failure, such as media that could not be opened.
    ///
    /// Before any progress was published the stream is dropped; afterwards it is held paused.
    pub fn engine_error(&mut self, message: String) {
        let stream = match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Loaded(stream)
            | PlaybackState::Playing(stream)
            | PlaybackState::Paused(stream)
            | PlaybackState::Seeking { stream, .. } => stream,
            other => {
                tracing::debug!(phase = ?other.phase(), error = %message, "engine error ignored");
                self.state = other;
                return;
            }
        };
        tracing::warn!(content_id = %stream.content_id, error = %message, "engine reported a failure");
        self.events.failure(FailureKind::Engine, message);
        self.media_failed = true;
        if self.progress_seen {
            if let Err(e) = self.engine.pause() {
                tracing::debug!(error = %e, "pause after engine failure failed");
            }
            self.transition(PlaybackState::Paused(stream));
        } else {
            if let Err(e) = self.engine.stop() {
                tracing::debug!(error = %e, "stop after engine failure failed");
            }
            self.transition(PlaybackState::Idle);
        }
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        if let Err(e) = self.engine.set_volume(self.volume) {
            self.engine_failure(e);
        }
    }

    /// Release the engine's media and return to idle. Invalidates in-flight work.
    pub fn stop(&mut self) {
        self.activation_seq += 1;
        if matches!(self.state, PlaybackState::Idle) {
            return;
        }
        if let Err(e) = self.engine.stop() {
            tracing::warn!(error = %e, "engine stop failed");
        }
        self.transition(PlaybackState::Idle);
    }

    fn clear_pending_if(&mut self, content_id: &str) {
        if self.pending_selection.as_deref() == Some(content_id) {
            self.pending_selection = None;
            self.events
                .emit(SessionEvent::SelectionChanged { content_id: None });
        }
    }

    fn engine_failure(&self, e: crate::error::EngineError) {
        tracing::warn!(error = %e, phase = ?self.state.phase(), "engine command failed");
        self.events.failure(FailureKind::from(&e), e.to_string());
    }

    fn transition(&mut self, next: PlaybackState) {
        tracing::debug!(from = ?self.state.phase(), to = ?next.phase(), "state transition");
        self.state = next;
        self.events.state_changed(self.status());
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::Receiver;

    use super::*;
    use crate::engine::fake::{EngineCall, FakeEngine};

    fn stream(id: &str, url: &str, title: &str) -> ResolvedStream {
        ResolvedStream {
            stream_locator: url.to_string(),
            title: title.to_string(),
            content_id: id.to_string(),
        }
    }

    fn session(duration_ms: u64) -> (Session<FakeEngine>, FakeEngine, Receiver<SessionEvent>) {
        let engine = FakeEngine::with_duration(duration_ms);
        let (sink, rx) = EventSink::channel();
        let session = Session::new(engine.clone(), sink, 50);
        (session, engine, rx)
    }

    fn playing(
        duration_ms: u64,
    ) -> (Session<FakeEngine>, FakeEngine, Receiver<SessionEvent>) {
        let (mut s, engine, rx) = session(duration_ms);
        let ticket = s.activate("abc".into()).unwrap();
        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        while rx.try_recv().is_ok() {}
        (s, engine, rx)
    }

    fn progress_events(rx: &Receiver<SessionEvent>) -> Vec<ProgressSnapshot> {
        rx.try_iter()
            .filter_map(|e| match e {
                SessionEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn activate_resolve_pause_end_flow() {
        let (mut s, engine, _rx) = session(200_000);
        let ticket = s.activate("abc".into()).unwrap();
        assert_eq!(s.state().phase(), PlaybackPhase::Resolving);

        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        assert_eq!(s.state(), &PlaybackState::Playing(stream("abc", "u1", "Song A")));
        assert_eq!(engine.loads(), vec!["u1".to_string()]);

        s.pause();
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
        s.end_reached();
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);

        s.resume();
        s.end_reached();
        assert_eq!(s.state(), &PlaybackState::Ended);
    }

    #[test]
    fn only_latest_activation_reaches_playing() {
        let (mut s, engine, _rx) = session(1_000);
        let first = s.activate("id1".into()).unwrap();
        let second = s.activate("id2".into()).unwrap();
        assert!(second.seq > first.seq);

        s.on_resolved(first.seq, Ok(stream("id1", "u-id1", "One")));
        assert_eq!(s.state().content_id(), Some("id2"));
        assert_eq!(s.state().phase(), PlaybackPhase::Resolving);
        assert!(engine.loads().is_empty());

        s.on_resolved(second.seq, Ok(stream("id2", "u-id2", "Two")));
        assert_eq!(s.state().phase(), PlaybackPhase::Playing);
        assert_eq!(engine.loads(), vec!["u-id2".to_string()]);
    }

    #[test]
    fn stale_completion_after_newer_stream_plays_is_ignored() {
        let (mut s, engine, _rx) = session(1_000);
        let first = s.activate("id1".into()).unwrap();
        let second = s.activate("id2".into()).unwrap();
        s.on_resolved(second.seq, Ok(stream("id2", "u-id2", "Two")));
        s.on_resolved(first.seq, Ok(stream("id1", "u-id1", "One")));
        assert_eq!(s.state().content_id(), Some("id2"));
        assert_eq!(engine.loads(), vec!["u-id2".to_string()]);
    }

    #[test]
    fn resolution_failure_returns_to_idle_without_load() {
        let (mut s, engine, rx) = session(1_000);
        let ticket = s.activate("bad".into()).unwrap();
        s.on_resolved(ticket.seq, Err(ResolveError::Unavailable("private video".into())));
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(engine.loads().is_empty());
        let failed = rx.try_iter().any(|e| {
            matches!(
                e,
                SessionEvent::Failure {
                    kind: FailureKind::Resolution,
                    ..
                }
            )
        });
        assert!(failed);
    }

    #[test]
    fn mismatched_content_id_is_treated_as_failure() {
        let (mut s, engine, _rx) = session(1_000);
        let ticket = s.activate("abc".into()).unwrap();
        s.on_resolved(ticket.seq, Ok(stream("other", "u9", "Other")));
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(engine.loads().is_empty());
    }

    #[test]
    fn activating_other_id_while_playing_stops_current_audio() {
        let (mut s, engine, _rx) = playing(1_000);
        let ticket = s.activate("next".into()).unwrap();
        assert_eq!(ticket.content_id, "next");
        assert_eq!(s.state().phase(), PlaybackPhase::Resolving);
        assert_eq!(engine.calls().last(), Some(&EngineCall::Stop));
    }

    #[test]
    fn activating_loaded_id_again_is_a_no_op() {
        let (mut s, engine, _rx) = playing(1_000);
        let before = engine.calls().len();
        assert!(s.activate("abc".into()).is_none());
        assert_eq!(s.state().phase(), PlaybackPhase::Playing);
        assert_eq!(engine.calls().len(), before);
    }

    #[test]
    fn engine_load_failure_returns_to_idle() {
        let (mut s, engine, rx) = session(1_000);
        engine.state.lock().unwrap().fail_load = true;
        let ticket = s.activate("abc".into()).unwrap();
        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(rx.try_iter().any(|e| matches!(
            e,
            SessionEvent::Failure {
                kind: FailureKind::Engine,
                ..
            }
        )));
    }

    #[test]
    fn engine_play_failure_keeps_stream_paused() {
        let (mut s, engine, _rx) = session(1_000);
        engine.state.lock().unwrap().fail_play = true;
        let ticket = s.activate("abc".into()).unwrap();
        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
    }

    fn engine_failures(rx: &Receiver<SessionEvent>) -> usize {
        rx.try_iter()
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::Failure {
                        kind: FailureKind::Engine,
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn pause_failure_lands_paused_and_reports() {
        let (mut s, engine, rx) = playing(1_000);
        engine.state.lock().unwrap().fail_pause = true;
        s.pause();
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
        assert_eq!(engine_failures(&rx), 1);
    }

    #[test]
    fn pause_failure_during_drag_resumes_paused() {
        let (mut s, engine, _rx) = playing(10_000);
        engine.state.lock().unwrap().fail_pause = true;
        s.seek_begin();
        s.pause();
        s.seek_commit(0.5);
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
    }

    #[test]
    fn seek_failure_lands_paused_and_publishes_once() {
        let (mut s, engine, rx) = playing(10_000);
        engine.set_position(2_000);
        engine.state.lock().unwrap().fail_seek = true;
        s.seek_begin();
        let snap = s.seek_commit(0.5).unwrap();
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
        assert_eq!(snap.position_ms, 2_000);
        assert_eq!(engine.calls().last(), Some(&EngineCall::Pause));

        let events: Vec<_> = rx.try_iter().collect();
        let snaps = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Progress(_)))
            .count();
        assert_eq!(snaps, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Failure {
                kind: FailureKind::Engine,
                ..
            }
        )));
    }

    #[test]
    fn resume_failure_stays_paused() {
        let (mut s, engine, rx) = playing(1_000);
        s.pause();
        engine.state.lock().unwrap().fail_play = true;
        s.resume();
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
        assert_eq!(engine_failures(&rx), 1);
    }

    #[test]
    fn engine_error_before_progress_drops_the_stream() {
        let (mut s, engine, rx) = playing(10_000);
        s.engine_error("loading failed".into());
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert_eq!(engine.calls().last(), Some(&EngineCall::Stop));
        assert_eq!(engine_failures(&rx), 1);
    }

    #[test]
    fn engine_error_after_progress_holds_paused() {
        let (mut s, engine, rx) = playing(10_000);
        engine.set_position(3_000);
        s.tick().unwrap();
        s.engine_error("network dropped".into());
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
        assert_eq!(engine.calls().last(), Some(&EngineCall::Pause));
        assert_eq!(engine_failures(&rx), 1);

        // the failed media can be activated again
        let ticket = s.activate("abc".into()).unwrap();
        s.on_resolved(ticket.seq, Ok(stream("abc", "u2", "Song A")));
        assert_eq!(s.state().phase(), PlaybackPhase::Playing);
        assert!(s.activate("abc".into()).is_none());
    }

    #[test]
    fn engine_error_without_a_stream_is_ignored() {
        let (mut s, engine, rx) = session(10_000);
        s.engine_error("stray".into());
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(engine.calls().iter().all(|c| matches!(c, EngineCall::SetVolume(_))));
        assert_eq!(engine_failures(&rx), 0);

        s.activate("abc".into()).unwrap();
        s.engine_error("stray".into());
        assert_eq!(s.state().phase(), PlaybackPhase::Resolving);
    }

    #[test]
    fn no_progress_published_during_seek_drag_and_one_after_commit() {
        let (mut s, engine, rx) = playing(200_000);
        engine.set_position(10_000);

        s.seek_begin();
        assert_eq!(s.state().phase(), PlaybackPhase::Seeking);
        for _ in 0..5 {
            assert!(s.tick().is_none());
        }
        assert!(progress_events(&rx).is_empty());

        let snap = s.seek_commit(0.25).unwrap();
        assert_eq!(snap.position_ms, 50_000);
        assert_eq!(snap.duration_ms, 200_000);
        assert_eq!(progress_events(&rx), vec![snap]);
        assert_eq!(s.state().phase(), PlaybackPhase::Playing);
        assert!(engine.calls().contains(&EngineCall::SeekTo(50_000)));
    }

    #[test]
    fn seek_preserves_paused_mode() {
        let (mut s, _engine, _rx) = playing(60_000);
        s.pause();
        s.seek_begin();
        s.seek_commit(1.0);
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
    }

    #[test]
    fn seek_endpoints_map_to_start_and_duration() {
        let (mut s, _engine, _rx) = playing(90_000);
        assert_eq!(s.seek_commit(0.0).unwrap().position_ms, 0);
        assert_eq!(s.seek_commit(1.0).unwrap().position_ms, 90_000);
    }

    #[test]
    fn seek_commit_without_stream_is_a_no_op() {
        let (mut s, engine, rx) = session(90_000);
        assert!(s.seek_commit(0.5).is_none());
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::SeekTo(_))));
        assert!(progress_events(&rx).is_empty());
    }

    #[test]
    fn tick_publishes_only_with_known_duration() {
        let (mut s, engine, rx) = playing(0);
        engine.set_position(1_000);
        assert!(s.tick().is_none());

        engine.state.lock().unwrap().duration_ms = 5_000;
        let snap = s.tick().unwrap();
        assert_eq!(snap.position_ms, 1_000);
        assert_eq!(progress_events(&rx).len(), 1);
    }

    #[test]
    fn tick_positions_are_non_decreasing_while_playing() {
        let (mut s, engine, _rx) = playing(10_000);
        let mut last = 0;
        for pos in [0, 500, 1_000, 1_000, 1_500, 12_000] {
            engine.set_position(pos);
            let snap = s.tick().unwrap();
            assert!(snap.position_ms >= last);
            assert!(snap.position_ms <= snap.duration_ms);
            last = snap.position_ms;
        }
    }

    #[test]
    fn tick_does_not_publish_while_idle_or_resolving() {
        let (mut s, engine, _rx) = session(10_000);
        assert!(s.tick().is_none());
        s.activate("abc".into());
        assert!(s.tick().is_none());
        assert_eq!(engine.state.lock().unwrap().position_reads, 0);
    }

    #[test]
    fn selection_does_not_change_state() {
        let (mut s, _engine, rx) = playing(10_000);
        s.select("next".into());
        assert_eq!(s.state().phase(), PlaybackPhase::Playing);
        assert_eq!(s.status().pending_selection.as_deref(), Some("next"));
        assert!(rx.try_iter().any(|e| e
            == SessionEvent::SelectionChanged {
                content_id: Some("next".into())
            }));
    }

    #[test]
    fn toggle_activates_pending_then_pauses_and_resumes() {
        let (mut s, _engine, _rx) = session(10_000);
        assert!(s.toggle().is_none());

        s.select("abc".into());
        let ticket = s.toggle().unwrap();
        assert_eq!(ticket.content_id, "abc");
        assert!(s.status().pending_selection.is_none());

        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        assert!(s.toggle().is_none());
        assert_eq!(s.state().phase(), PlaybackPhase::Paused);
        assert!(s.toggle().is_none());
        assert_eq!(s.state().phase(), PlaybackPhase::Playing);
    }

    #[test]
    fn toggle_after_end_replays_last_stream() {
        let (mut s, _engine, _rx) = playing(10_000);
        s.end_reached();
        let ticket = s.toggle().unwrap();
        assert_eq!(ticket.content_id, "abc");
        assert_eq!(s.state().phase(), PlaybackPhase::Resolving);
    }

    #[test]
    fn volume_is_clamped_and_reapplied_after_load() {
        let (mut s, engine, _rx) = session(10_000);
        s.set_volume(150);
        assert_eq!(s.status().volume, 100);
        let ticket = s.activate("abc".into()).unwrap();
        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        let calls = engine.calls();
        let load_at = calls
            .iter()
            .position(|c| *c == EngineCall::Load("u1".into()))
            .unwrap();
        assert_eq!(calls[load_at + 1], EngineCall::SetVolume(100));
    }

    #[test]
    fn stop_invalidates_in_flight_resolution() {
        let (mut s, engine, _rx) = session(10_000);
        let ticket = s.activate("abc".into()).unwrap();
        s.stop();
        assert_eq!(s.state(), &PlaybackState::Idle);
        s.on_resolved(ticket.seq, Ok(stream("abc", "u1", "Song A")));
        assert_eq!(s.state(), &PlaybackState::Idle);
        assert!(engine.loads().is_empty());
    }

    #[test]
    fn activation_during_seek_drag_supersedes_seek() {
        let (mut s, _engine, _rx) = playing(10_000);
        s.seek_begin();
        s.activate("next".into()).unwrap();
        assert!(s.seek_commit(0.5).is_none());
        assert_eq!(s.state().phase(), PlaybackPhase::Resolving);
    }
}

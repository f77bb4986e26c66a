//! Session controller worker.
//!
//! Owns the `Session` on a dedicated thread. Commands from the front end,
//! resolution completions, and end-of-stream notifications all arrive on one
//! channel and are applied strictly in arrival order.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use youtufy_types::{ResolvedStream, SessionStatus};

use crate::config::SessionConfig;
use crate::engine::PlaybackEngine;
use crate::error::{ResolveError, SessionClosed};
use crate::events::{EventSink, SessionEvent};
use crate::resolver::{self, StreamResolver};
use crate::session::{ResolveTicket, Session};

/// Commands accepted by the session controller thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Select { content_id: String },
    Activate { content_id: String },
    Toggle,
    Pause,
    Resume,
    SeekBegin,
    SeekCommit { fraction: f64 },
    SetVolume { value: u8 },
    Stop,
    Shutdown,
}

enum ControllerMessage {
    Command(SessionCommand),
    Resolved {
        seq: u64,
        result: Result<ResolvedStream, ResolveError>,
    },
    EndReached,
    EngineFailed(String),
}

/// Cloneable handle for driving the controller from any thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Sender<ControllerMessage>,
    status: Arc<Mutex<SessionStatus>>,
}

impl SessionHandle {
    pub fn send(&self, cmd: SessionCommand) -> Result<(), SessionClosed> {
        self.tx
            .send(ControllerMessage::Command(cmd))
            .map_err(|_| SessionClosed)
    }

    pub fn select(&self, content_id: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Select {
            content_id: content_id.into(),
        })
    }

    pub fn activate(&self, content_id: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Activate {
            content_id: content_id.into(),
        })
    }

    pub fn toggle(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Toggle)
    }

    pub fn pause(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Resume)
    }

    pub fn seek_begin(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SeekBegin)
    }

    pub fn seek_commit(&self, fraction: f64) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SeekCommit { fraction })
    }

    pub fn set_volume(&self, value: u8) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetVolume { value })
    }

    pub fn stop(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Stop)
    }

    /// Last status published by the controller thread.
    pub fn status(&self) -> SessionStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Running controller. Dropping it shuts the worker down.
pub struct SessionController {
    handle: SessionHandle,
    join: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop playback, end the worker, and wait for it to exit.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let _ = self.handle.send(SessionCommand::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("session controller thread panicked");
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Spawn the controller thread around `engine`.
pub fn spawn<E>(
    mut engine: E,
    resolver: Arc<dyn StreamResolver>,
    config: SessionConfig,
) -> (SessionController, Receiver<SessionEvent>)
where
    E: PlaybackEngine + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    let (events, events_rx) = EventSink::channel();

    let end_tx = tx.clone();
    engine.on_end_reached(Box::new(move || {
        let _ = end_tx.send(ControllerMessage::EndReached);
    }));
    let error_tx = tx.clone();
    engine.on_engine_error(Box::new(move |message| {
        let _ = error_tx.send(ControllerMessage::EngineFailed(message));
    }));

    let session = Session::new(engine, events, config.initial_volume);
    let status = Arc::new(Mutex::new(session.status()));
    let handle = SessionHandle {
        tx: tx.clone(),
        status: status.clone(),
    };

    let worker = Worker {
        session,
        resolver,
        config,
        tx,
        status,
    };
    let join = std::thread::Builder::new()
        .name("youtufy-session".into())
        .spawn(move || worker.run(rx));
    let join = match join {
        Ok(join) => Some(join),
        Err(e) => {
            tracing::error!(error = %e, "failed to spawn session controller thread");
            None
        }
    };

    (SessionController { handle, join }, events_rx)
}

struct Worker<E: PlaybackEngine> {
    session: Session<E>,
    resolver: Arc<dyn StreamResolver>,
    config: SessionConfig,
    tx: Sender<ControllerMessage>,
    status: Arc<Mutex<SessionStatus>>,
}

impl<E: PlaybackEngine> Worker<E> {
    fn run(mut self, rx: Receiver<ControllerMessage>) {
        tracing::info!(tick_ms = self.config.tick_interval.as_millis() as u64, "session controller started");
        let mut next_tick: Option<Instant> = None;
        loop {
            let tick = match next_tick {
                Some(at) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };
            crossbeam_channel::select! {
                recv(rx) -> msg => {
                    let Ok(msg) = msg else { break };
                    if !self.handle(msg) {
                        break;
                    }
                }
                recv(tick) -> _ => {
                    self.session.tick();
                    next_tick = None;
                }
            }

            if self.session.wants_ticks() {
                if next_tick.is_none() {
                    next_tick = Some(Instant::now() + self.config.tick_interval);
                }
            } else {
                next_tick = None;
            }
            self.publish_status();
        }
        self.session.stop();
        self.publish_status();
        tracing::info!("session controller stopped");
    }

    /// Apply one message. Returns `false` on shutdown.
    fn handle(&mut self, msg: ControllerMessage) -> bool {
        match msg {
            ControllerMessage::Command(cmd) => {
                tracing::debug!(?cmd, "session command");
                match cmd {
                    SessionCommand::Select { content_id } => self.session.select(content_id),
                    SessionCommand::Activate { content_id } => {
                        let ticket = self.session.activate(content_id);
                        self.dispatch(ticket);
                    }
                    SessionCommand::Toggle => {
                        let ticket = self.session.toggle();
                        self.dispatch(ticket);
                    }
                    SessionCommand::Pause => self.session.pause(),
                    SessionCommand::Resume => self.session.resume(),
                    SessionCommand::SeekBegin => self.session.seek_begin(),
                    SessionCommand::SeekCommit { fraction } => {
                        self.session.seek_commit(fraction);
                    }
                    SessionCommand::SetVolume { value } => self.session.set_volume(value),
                    SessionCommand::Stop => self.session.stop(),
                    SessionCommand::Shutdown => return false,
                }
            }
            ControllerMessage::Resolved { seq, result } => self.session.on_resolved(seq, result),
            ControllerMessage::EndReached => self.session.end_reached(),
            ControllerMessage::EngineFailed(message) => self.session.engine_error(message),
        }
        true
    }

    /// Run resolution for `ticket` on its own thread; the outcome re-enters through the channel.
    fn dispatch(&mut self, ticket: Option<ResolveTicket>) {
        let Some(ResolveTicket { seq, content_id }) = ticket else {
            return;
        };
        let resolver = self.resolver.clone();
        let tx = self.tx.clone();
        let retries = self.config.resolve_retries;
        let spawned = std::thread::Builder::new()
            .name("youtufy-resolve".into())
            .spawn(move || {
                let result = resolver::resolve_with_retry(resolver.as_ref(), &content_id, retries);
                if tx.send(ControllerMessage::Resolved { seq, result }).is_err() {
                    tracing::debug!(seq, "controller gone before resolution finished");
                }
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn resolver thread");
            self.session
                .on_resolved(seq, Err(ResolveError::Spawn(e.to_string())));
        }
    }

    fn publish_status(&self) {
        if let Ok(mut status) = self.status.lock() {
            *status = self.session.status();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use youtufy_types::{FailureKind, PlaybackPhase};

    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::resolver::fake::FakeResolver;

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> SessionConfig {
        SessionConfig {
            tick_interval: Duration::from_millis(20),
            resolve_retries: 0,
            ..SessionConfig::default()
        }
    }

    fn start(
        engine: &FakeEngine,
        resolver: Arc<FakeResolver>,
    ) -> (SessionController, Receiver<SessionEvent>) {
        spawn(engine.clone(), resolver, config())
    }

    fn wait_for<F>(rx: &Receiver<SessionEvent>, mut pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = rx.recv_timeout(remaining).expect("timed out waiting for event");
            if pred(&event) {
                return event;
            }
        }
    }

    fn phase_is(phase: PlaybackPhase) -> impl FnMut(&SessionEvent) -> bool {
        move |e| matches!(e, SessionEvent::StateChanged(s) if s.phase == phase)
    }

    #[test]
    fn activation_plays_resolved_stream() {
        let engine = FakeEngine::with_duration(180_000);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("abc", "u1", "Song A");
        let (controller, rx) = start(&engine, resolver);

        controller.handle().activate("abc").unwrap();
        let event = wait_for(&rx, phase_is(PlaybackPhase::Playing));
        let SessionEvent::StateChanged(status) = event else {
            unreachable!()
        };
        assert_eq!(status.title.as_deref(), Some("Song A"));
        assert_eq!(engine.loads(), vec!["u1".to_string()]);
        controller.shutdown();
    }

    #[test]
    fn late_resolution_of_superseded_activation_never_loads() {
        let engine = FakeEngine::with_duration(1_000);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("id1", "u-id1", "One");
        resolver.ok("id2", "u-id2", "Two");
        let release = resolver.gate("id1");
        let (controller, rx) = start(&engine, resolver.clone());
        let handle = controller.handle();

        handle.activate("id1").unwrap();
        handle.activate("id2").unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));

        release.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(engine.loads(), vec!["u-id2".to_string()]);
        assert_eq!(handle.status().content_id.as_deref(), Some("id2"));
        controller.shutdown();
    }

    #[test]
    fn end_of_stream_moves_to_ended() {
        let engine = FakeEngine::with_duration(1_000);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("abc", "u1", "Song A");
        let (controller, rx) = start(&engine, resolver);

        controller.handle().activate("abc").unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));
        engine.fire_end_reached();
        wait_for(&rx, phase_is(PlaybackPhase::Ended));
        controller.shutdown();
    }

    #[test]
    fn progress_ticks_while_playing() {
        let engine = FakeEngine::with_duration(60_000);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("abc", "u1", "Song A");
        let (controller, rx) = start(&engine, resolver);

        controller.handle().activate("abc").unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));
        engine.set_position(30_000);
        let event = wait_for(&rx, |e| {
            matches!(e, SessionEvent::Progress(p) if p.position_ms == 30_000)
        });
        assert_eq!(
            event,
            SessionEvent::Progress(youtufy_types::ProgressSnapshot {
                position_ms: 30_000,
                duration_ms: 60_000,
            })
        );
        controller.shutdown();
    }

    #[test]
    fn failed_resolution_reports_and_idles() {
        let engine = FakeEngine::with_duration(1_000);
        let resolver = Arc::new(FakeResolver::default());
        let (controller, rx) = start(&engine, resolver);

        controller.handle().activate("bad").unwrap();
        wait_for(&rx, |e| {
            matches!(
                e,
                SessionEvent::Failure {
                    kind: FailureKind::Resolution,
                    ..
                }
            )
        });
        wait_for(&rx, phase_is(PlaybackPhase::Idle));
        assert!(engine.loads().is_empty());
        controller.shutdown();
    }

    #[test]
    fn no_ticks_publish_during_a_drag_and_commit_publishes_first() {
        let engine = FakeEngine::with_duration(100_000);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("abc", "u1", "Song A");
        let (controller, rx) = start(&engine, resolver);
        let handle = controller.handle();

        handle.activate("abc").unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));
        engine.set_position(5_000);
        handle.seek_begin().unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Seeking));

        // several tick intervals pass while the user drags
        std::thread::sleep(Duration::from_millis(100));
        assert!(!rx.try_iter().any(|e| matches!(e, SessionEvent::Progress(_))));

        handle.seek_commit(0.5).unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));
        let next = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(
            next,
            SessionEvent::Progress(youtufy_types::ProgressSnapshot {
                position_ms: 50_000,
                duration_ms: 100_000,
            })
        );
        controller.shutdown();
    }

    #[test]
    fn end_of_stream_after_a_new_activation_is_ignored() {
        let engine = FakeEngine::with_duration(1_000);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("abc", "u1", "Song A");
        resolver.ok("next", "u2", "Song B");
        let release = resolver.gate("next");
        let (controller, rx) = start(&engine, resolver);
        let handle = controller.handle();

        handle.activate("abc").unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));
        handle.activate("next").unwrap();
        engine.fire_end_reached();
        wait_for(&rx, phase_is(PlaybackPhase::Resolving));
        release.send(()).unwrap();

        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining).expect("timed out waiting for playback") {
                SessionEvent::StateChanged(s) if s.phase == PlaybackPhase::Ended => {
                    panic!("stale end of stream ended the new activation")
                }
                SessionEvent::StateChanged(s) if s.phase == PlaybackPhase::Playing => {
                    assert_eq!(s.content_id.as_deref(), Some("next"));
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(engine.loads(), vec!["u1".to_string(), "u2".to_string()]);
        controller.shutdown();
    }

    #[test]
    fn asynchronous_engine_error_reports_and_idles() {
        let engine = FakeEngine::with_duration(0);
        let resolver = Arc::new(FakeResolver::default());
        resolver.ok("abc", "u1", "Song A");
        let (controller, rx) = start(&engine, resolver);

        controller.handle().activate("abc").unwrap();
        wait_for(&rx, phase_is(PlaybackPhase::Playing));
        engine.fire_engine_error("loading failed");
        let event = wait_for(&rx, |e| matches!(e, SessionEvent::Failure { .. }));
        assert_eq!(
            event,
            SessionEvent::Failure {
                kind: FailureKind::Engine,
                message: "loading failed".into(),
            }
        );
        wait_for(&rx, phase_is(PlaybackPhase::Idle));
        controller.shutdown();
    }

    #[test]
    fn handle_reports_closed_after_shutdown() {
        let engine = FakeEngine::default();
        let (controller, _rx) = start(&engine, Arc::new(FakeResolver::default()));
        let handle = controller.handle();
        controller.shutdown();
        assert!(handle.toggle().is_err());
    }
}

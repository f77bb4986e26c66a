//! `PlaybackEngine` backed by an mpv child process over its JSON IPC socket.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::engine::{EndReachedCallback, EngineErrorCallback, PlaybackEngine};
use crate::error::EngineError;

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type Reply = Result<Value, String>;
type PendingReplies = Arc<Mutex<HashMap<u64, Sender<Reply>>>>;
type SharedCallbacks = Arc<Mutex<Callbacks>>;

#[derive(Default)]
struct Callbacks {
    end_reached: Option<EndReachedCallback>,
    engine_error: Option<EngineErrorCallback>,
}

pub struct MpvEngine {
    child: Child,
    socket_path: PathBuf,
    writer: UnixStream,
    pending: PendingReplies,
    callbacks: SharedCallbacks,
    next_request_id: u64,
}

impl MpvEngine {
    /// Start an idle, audio-only mpv and connect to its IPC socket.
    pub fn spawn(program: &Path) -> Result<Self, EngineError> {
        let socket_path =
            std::env::temp_dir().join(format!("youtufy-mpv-{}.sock", uuid::Uuid::new_v4()));
        let mut child = Command::new(program)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg("--pause")
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {e}", program.display())))?;

        let writer = match connect(&socket_path) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        let reader = writer
            .try_clone()
            .map_err(|e| EngineError::Ipc(format!("clone ipc socket: {e}")))?;

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let callbacks = SharedCallbacks::default();
        {
            let pending = pending.clone();
            let callbacks = callbacks.clone();
            std::thread::Builder::new()
                .name("youtufy-mpv-ipc".into())
                .spawn(move || read_loop(reader, pending, callbacks))
                .map_err(|e| EngineError::Spawn(format!("ipc reader thread: {e}")))?;
        }

        tracing::info!(socket = %socket_path.display(), pid = child.id(), "mpv started");
        Ok(Self {
            child,
            socket_path,
            writer,
            pending,
            callbacks,
            next_request_id: 1,
        })
    }

    fn command(&mut self, args: Value) -> Result<Value, EngineError> {
        let name = args
            .get(0)
            .and_then(Value::as_str)
            .unwrap_or("command")
            .to_string();
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let (tx, rx) = crossbeam_channel::bounded(1);
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(request_id, tx);
        }
        let mut line = json!({ "command": args, "request_id": request_id }).to_string();
        line.push('\n');
        if let Err(e) = self.writer.write_all(line.as_bytes()) {
            self.forget(request_id);
            return Err(EngineError::Ipc(format!("write {name}: {e}")));
        }

        match rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(reason)) => Err(EngineError::Rejected {
                command: name,
                reason,
            }),
            Err(RecvTimeoutError::Timeout) => {
                self.forget(request_id);
                Err(EngineError::Ipc(format!("{name} timed out")))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed),
        }
    }

    fn forget(&self, request_id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&request_id);
        }
    }

    fn set_property(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        self.command(json!(["set_property", name, value])).map(|_| ())
    }

    /// Read a seconds property as milliseconds. Unavailable reads as zero.
    fn seconds_property_ms(&mut self, name: &str) -> Result<u64, EngineError> {
        match self.command(json!(["get_property", name])) {
            Ok(value) => Ok(seconds_to_ms(&value)),
            Err(EngineError::Rejected { reason, .. }) if reason == "property unavailable" => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl PlaybackEngine for MpvEngine {
    fn load(&mut self, locator: &str) -> Result<(), EngineError> {
        self.set_property("pause", json!(true))?;
        self.command(json!(["loadfile", locator, "replace"]))
            .map(|_| ())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.set_property("pause", json!(false))
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.set_property("pause", json!(true))
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.command(json!(["stop"])).map(|_| ())
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError> {
        self.set_property("volume", json!(volume.min(100)))
    }

    fn position_ms(&mut self) -> Result<u64, EngineError> {
        self.seconds_property_ms("time-pos")
    }

    fn duration_ms(&mut self) -> Result<u64, EngineError> {
        self.seconds_property_ms("duration")
    }

    fn seek_to_ms(&mut self, ms: u64) -> Result<(), EngineError> {
        let seconds = ms as f64 / 1000.0;
        self.command(json!(["seek", seconds, "absolute"]))
            .map(|_| ())
    }

    fn on_end_reached(&mut self, callback: EndReachedCallback) {
        if let Ok(mut slots) = self.callbacks.lock() {
            slots.end_reached = Some(callback);
        }
    }

    fn on_engine_error(&mut self, callback: EngineErrorCallback) {
        if let Ok(mut slots) = self.callbacks.lock() {
            slots.engine_error = Some(callback);
        }
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        let _ = self
            .writer
            .write_all(b"{\"command\":[\"quit\"]}\n");
        std::thread::sleep(Duration::from_millis(50));
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::debug!(socket = %self.socket_path.display(), "mpv stopped");
    }
}

fn connect(path: &Path) -> Result<UnixStream, EngineError> {
    let mut last_error = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_error = Some(e);
                std::thread::sleep(CONNECT_BACKOFF);
            }
        }
    }
    Err(EngineError::Spawn(format!(
        "mpv ipc socket {} not ready: {}",
        path.display(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn read_loop(stream: UnixStream, pending: PendingReplies, callbacks: SharedCallbacks) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(error = %e, "mpv ipc read failed");
                break;
            }
        };
        dispatch(parse_line(&line), &pending, &callbacks);
    }
    // Dropping the waiters wakes any blocked command with `Closed`.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    tracing::debug!("mpv ipc reader exited");
}

fn dispatch(line: IpcLine, pending: &PendingReplies, callbacks: &SharedCallbacks) {
    match line {
        IpcLine::Reply { request_id, reply } => {
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&request_id));
            if let Some(waiter) = waiter {
                let _ = waiter.send(reply);
            }
        }
        IpcLine::EndOfFile => {
            tracing::debug!("mpv reached end of file");
            if let Ok(slots) = callbacks.lock() {
                if let Some(cb) = slots.end_reached.as_ref() {
                    cb();
                }
            }
        }
        IpcLine::LoadFailed(reason) => {
            tracing::warn!(reason = %reason, "mpv could not play the loaded stream");
            if let Ok(slots) = callbacks.lock() {
                if let Some(cb) = slots.engine_error.as_ref() {
                    cb(reason);
                }
            }
        }
        IpcLine::Other => {}
    }
}

#[derive(Deserialize)]
struct IpcMessage {
    request_id: Option<u64>,
    error: Option<String>,
    #[serde(default)]
    data: Value,
    event: Option<String>,
    reason: Option<String>,
    file_error: Option<String>,
}

#[derive(Debug, PartialEq)]
enum IpcLine {
    Reply { request_id: u64, reply: Reply },
    EndOfFile,
    LoadFailed(String),
    Other,
}

fn parse_line(line: &str) -> IpcLine {
    let Ok(msg) = serde_json::from_str::<IpcMessage>(line) else {
        return IpcLine::Other;
    };
    if let Some(event) = msg.event.as_deref() {
        return match (event, msg.reason.as_deref()) {
            ("end-file", Some("eof")) => IpcLine::EndOfFile,
            ("end-file", Some("error")) => IpcLine::LoadFailed(
                msg.file_error
                    .unwrap_or_else(|| "stream could not be played".to_string()),
            ),
            _ => IpcLine::Other,
        };
    }
    match (msg.request_id, msg.error) {
        (Some(request_id), Some(error)) if error == "success" => IpcLine::Reply {
            request_id,
            reply: Ok(msg.data),
        },
        (Some(request_id), Some(error)) => IpcLine::Reply {
            request_id,
            reply: Err(error),
        },
        _ => IpcLine::Other,
    }
}

fn seconds_to_ms(value: &Value) -> u64 {
    value
        .as_f64()
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| (s * 1000.0).round() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_reply() {
        let line = r#"{"data":12.5,"request_id":7,"error":"success"}"#;
        assert_eq!(
            parse_line(line),
            IpcLine::Reply {
                request_id: 7,
                reply: Ok(json!(12.5)),
            }
        );
    }

    #[test]
    fn parses_error_reply() {
        let line = r#"{"request_id":3,"error":"property unavailable"}"#;
        assert_eq!(
            parse_line(line),
            IpcLine::Reply {
                request_id: 3,
                reply: Err("property unavailable".into()),
            }
        );
    }

    #[test]
    fn only_eof_end_file_ends_the_stream() {
        assert_eq!(
            parse_line(r#"{"event":"end-file","reason":"eof","playlist_entry_id":1}"#),
            IpcLine::EndOfFile
        );
        assert_eq!(
            parse_line(r#"{"event":"end-file","reason":"stop"}"#),
            IpcLine::Other
        );
        assert_eq!(
            parse_line(r#"{"event":"end-file","reason":"error","file_error":"loading failed"}"#),
            IpcLine::LoadFailed("loading failed".into())
        );
        assert_eq!(
            parse_line(r#"{"event":"end-file","reason":"error"}"#),
            IpcLine::LoadFailed("stream could not be played".into())
        );
        assert_eq!(parse_line(r#"{"event":"playback-restart"}"#), IpcLine::Other);
        assert_eq!(parse_line("garbage"), IpcLine::Other);
    }

    #[test]
    fn load_failure_reaches_the_error_callback() {
        let pending = PendingReplies::default();
        let callbacks = SharedCallbacks::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        let ended = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let mut slots = callbacks.lock().unwrap();
            slots.engine_error = Some(Box::new(move |reason: String| {
                let _ = tx.send(reason);
            }));
            let ended = ended.clone();
            slots.end_reached = Some(Box::new(move || {
                ended.store(true, std::sync::atomic::Ordering::SeqCst);
            }));
        }

        let line = parse_line(r#"{"event":"end-file","reason":"error","file_error":"unrecognized file format"}"#);
        dispatch(line, &pending, &callbacks);
        assert_eq!(rx.try_recv().unwrap(), "unrecognized file format");
        assert!(!ended.load(std::sync::atomic::Ordering::SeqCst));

        dispatch(IpcLine::EndOfFile, &pending, &callbacks);
        assert!(ended.load(std::sync::atomic::Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reply_wakes_its_waiter() {
        let pending = PendingReplies::default();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pending.lock().unwrap().insert(4, tx);
        dispatch(parse_line(r#"{"request_id":4,"error":"success","data":null}"#), &pending, &SharedCallbacks::default());
        assert_eq!(rx.try_recv().unwrap(), Ok(Value::Null));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn seconds_convert_to_millis() {
        assert_eq!(seconds_to_ms(&json!(1.2345)), 1235);
        assert_eq!(seconds_to_ms(&json!(null)), 0);
        assert_eq!(seconds_to_ms(&json!(-3.0)), 0);
        assert_eq!(seconds_to_ms(&json!(200)), 200_000);
    }
}

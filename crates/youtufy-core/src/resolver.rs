//! Stream resolution: content id to a playable audio locator.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use youtufy_types::ResolvedStream;

use crate::error::ResolveError;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Turns a catalog content id into a direct audio stream.
///
/// Implementations block; callers run them off the session context.
pub trait StreamResolver: Send + Sync {
    fn resolve(&self, content_id: &str) -> Result<ResolvedStream, ResolveError>;
}

pub fn watch_url(content_id: &str) -> String {
    format!("{WATCH_URL}{content_id}")
}

/// Resolver backed by the `yt-dlp` executable.
pub struct YtDlpResolver {
    program: PathBuf,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, content_id: &str) -> Result<(bool, String, String), ResolveError> {
        let mut child = Command::new(&self.program)
            .args(["-f", "bestaudio", "--no-playlist", "--no-warnings", "-J"])
            .arg(watch_url(content_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ResolveError::Spawn(format!("{}: {e}", self.program.display())))?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    reap(&mut child);
                    tracing::warn!(content_id, timeout_ms = self.timeout.as_millis() as u64, "yt-dlp timed out");
                    return Err(ResolveError::Timeout(self.timeout.as_millis() as u64));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    reap(&mut child);
                    return Err(ResolveError::Extraction(format!("wait: {e}")));
                }
            }
        };

        let out = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let err = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
        Ok((status.success(), out, err))
    }
}

impl StreamResolver for YtDlpResolver {
    fn resolve(&self, content_id: &str) -> Result<ResolvedStream, ResolveError> {
        tracing::debug!(content_id, program = %self.program.display(), "running yt-dlp");
        let (success, stdout, stderr) = self.run(content_id)?;
        if !success {
            return Err(classify_failure(&stderr));
        }
        parse_extractor_output(content_id, &stdout)
    }
}

/// Kill the extractor and collect its exit status so no zombie is left behind.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "yt-dlp kill failed");
    }
    let _ = child.wait();
}

/// Read a pipe to completion on its own thread so neither pipe can fill and block the child.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

#[derive(Deserialize)]
struct ExtractorInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    requested_formats: Vec<ExtractorFormat>,
}

#[derive(Deserialize)]
struct ExtractorFormat {
    url: Option<String>,
}

/// Decode `yt-dlp -J` output into a stream for `content_id`.
pub fn parse_extractor_output(content_id: &str, json: &str) -> Result<ResolvedStream, ResolveError> {
    let info: ExtractorInfo =
        serde_json::from_str(json).map_err(|e| ResolveError::Parse(e.to_string()))?;
    let locator = info
        .url
        .or_else(|| info.requested_formats.into_iter().find_map(|f| f.url))
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ResolveError::Extraction("no audio url in extractor output".into()))?;
    if let Some(id) = info.id.as_deref() {
        if id != content_id {
            tracing::debug!(expected = content_id, got = id, "extractor reported a different id");
        }
    }
    Ok(ResolvedStream {
        stream_locator: locator,
        title: info.title.unwrap_or_else(|| content_id.to_string()),
        content_id: content_id.to_string(),
    })
}

/// Map extractor stderr to a failure. Availability problems are not retryable.
pub fn classify_failure(stderr: &str) -> ResolveError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("extractor exited with an error")
        .trim()
        .to_string();
    let lower = message.to_ascii_lowercase();
    let unavailable = [
        "video unavailable",
        "private video",
        "available in your country",
        "has been removed",
        "sign in to confirm your age",
    ];
    if unavailable.iter().any(|needle| lower.contains(needle)) {
        ResolveError::Unavailable(message)
    } else {
        ResolveError::Extraction(message)
    }
}

/// Resolve with up to `retries` extra attempts for retryable failures.
pub fn resolve_with_retry(
    resolver: &dyn StreamResolver,
    content_id: &str,
    retries: u32,
) -> Result<ResolvedStream, ResolveError> {
    let mut attempt = 0;
    loop {
        match resolver.resolve(content_id) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::info!(content_id, attempt, error = %e, "retrying resolution");
            }
            Err(e) => return Err(e),
        }
    }
}

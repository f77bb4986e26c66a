//! Line-oriented interactive front end.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, select};
use youtufy_core::controller::{SessionController, SessionHandle};
use youtufy_core::error::PreviewError;
use youtufy_core::preview::{PreviewClient, PreviewImage};
use youtufy_core::progress::format_time_ms;
use youtufy_core::search::{SearchBackend, SearchResults, SearchWorker};
use youtufy_core::SessionEvent;
use youtufy_types::{ProgressSnapshot, SessionStatus};

const HELP: &str = "\
commands:
  search <terms>   search the catalog
  results          list the current results
  select <n>       select result n without playing it
  play [n]         play result n, or toggle play/pause
  pause | resume   pause or resume playback
  seek <percent>   jump to a position (0-100)
  vol <0-100>      set the volume
  filter on|off    toggle the music filter
  status           show the session state
  stop             stop playback
  quit             exit";

pub struct ReplOptions {
    pub music_filter: bool,
    pub preview_timeout: Duration,
}

#[derive(Debug, PartialEq)]
enum ReplCommand {
    Search(String),
    Results,
    Select(usize),
    Play(Option<usize>),
    Pause,
    Resume,
    Seek(f64),
    Volume(u8),
    Filter(bool),
    Status,
    Stop,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ReplCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let index = |rest: &str| -> Result<usize, String> {
        match rest.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(format!("expected a result number, got {rest:?}")),
        }
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        "search" | "s" if rest.is_empty() => return Err("search needs terms".into()),
        "search" | "s" => ReplCommand::Search(rest.to_string()),
        "results" | "r" => ReplCommand::Results,
        "select" => ReplCommand::Select(index(rest)?),
        "play" | "p" | "toggle" if rest.is_empty() => ReplCommand::Play(None),
        "play" | "p" => ReplCommand::Play(Some(index(rest)?)),
        "pause" => ReplCommand::Pause,
        "resume" => ReplCommand::Resume,
        "seek" => {
            let pct: f64 = rest
                .trim_end_matches('%')
                .parse()
                .map_err(|_| format!("expected a percentage, got {rest:?}"))?;
            ReplCommand::Seek(pct / 100.0)
        }
        "vol" | "volume" => match rest.parse::<u8>() {
            Ok(value) if value <= 100 => ReplCommand::Volume(value),
            _ => return Err(format!("expected a volume 0-100, got {rest:?}")),
        },
        "filter" => match rest {
            "on" => ReplCommand::Filter(true),
            "off" => ReplCommand::Filter(false),
            _ => return Err("filter takes on or off".into()),
        },
        "status" => ReplCommand::Status,
        "stop" => ReplCommand::Stop,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => return Err(format!("unknown command {other:?}; try help")),
    };
    Ok(Some(cmd))
}

struct Repl {
    handle: SessionHandle,
    searches: SearchWorker,
    results: SearchResults,
    music_filter: bool,
    preview: Arc<PreviewClient>,
    preview_tx: Sender<(String, Result<PreviewImage, PreviewError>)>,
    last_progress: Option<ProgressSnapshot>,
}

impl Repl {
    /// Returns `false` when the user asked to quit.
    fn execute(&mut self, cmd: ReplCommand) -> Result<bool> {
        match cmd {
            ReplCommand::Search(query) => {
                let seq = self.searches.submit(query.clone(), self.music_filter);
                tracing::debug!(seq, query = %query, "search submitted");
                println!("searching for {query:?}...");
            }
            ReplCommand::Results => self.print_results(),
            ReplCommand::Select(index) => self.select(index)?,
            ReplCommand::Play(Some(index)) => {
                if let Some(result) = self.results.get(index) {
                    self.handle.activate(result.content_id.clone())?;
                } else {
                    println!("no result {}", index + 1);
                }
            }
            ReplCommand::Play(None) => self.handle.toggle()?,
            ReplCommand::Pause => self.handle.pause()?,
            ReplCommand::Resume => self.handle.resume()?,
            ReplCommand::Seek(fraction) => {
                self.handle.seek_begin()?;
                self.handle.seek_commit(fraction)?;
            }
            ReplCommand::Volume(value) => self.handle.set_volume(value)?,
            ReplCommand::Filter(on) => {
                self.music_filter = on;
                println!("music filter {}", if on { "on" } else { "off" });
            }
            ReplCommand::Status => self.print_status(&self.handle.status()),
            ReplCommand::Stop => self.handle.stop()?,
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn select(&mut self, index: usize) -> Result<()> {
        let Some(result) = self.results.get(index).cloned() else {
            println!("no result {}", index + 1);
            return Ok(());
        };
        println!("selected: {}", result.title);
        self.handle.select(result.content_id.clone())?;

        let client = self.preview.clone();
        let tx = self.preview_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("youtufy-preview".into())
            .spawn(move || {
                let fetched = client.fetch_preview(&result.content_id, &result.preview_image_ref);
                let _ = tx.send((result.content_id, fetched));
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn preview thread");
        }
        Ok(())
    }

    fn print_results(&self) {
        if self.results.results().is_empty() {
            println!("no results");
            return;
        }
        println!("results for {:?}:", self.results.query());
        for (i, r) in self.results.results().iter().enumerate() {
            println!("{:>2}. {}", i + 1, r.title);
        }
    }

    fn print_status(&self, status: &SessionStatus) {
        let title = status.title.as_deref().unwrap_or("-");
        print!("{:?}: {title} (vol {})", status.phase, status.volume);
        if let Some(p) = self.last_progress.filter(|_| status.title.is_some()) {
            print!(
                " {} / {} [{}%]",
                format_time_ms(p.position_ms),
                format_time_ms(p.duration_ms),
                p.percent()
            );
        }
        println!();
        if let Some(pending) = status.pending_selection.as_deref() {
            println!("pending selection: {pending}");
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Progress(p) => self.last_progress = Some(p),
            SessionEvent::NowPlaying { title, .. } => {
                self.last_progress = None;
                println!("now playing: {title}");
            }
            SessionEvent::StateChanged(status) => {
                tracing::debug!(phase = ?status.phase, "state changed");
                if status.phase == youtufy_types::PlaybackPhase::Ended {
                    println!("finished: {}", status.title.as_deref().unwrap_or("-"));
                }
            }
            SessionEvent::Failure { kind, message } => println!("{kind:?} failure: {message}"),
            SessionEvent::SelectionChanged { .. } => {}
        }
    }
}

/// Run the interactive loop until `quit`, end of input, or an interrupt.
pub fn run(
    controller: SessionController,
    events: Receiver<SessionEvent>,
    search: Arc<dyn SearchBackend>,
    options: ReplOptions,
    interrupt: Receiver<()>,
) -> Result<()> {
    let (searches, search_rx) = SearchWorker::new(search);
    let (preview_tx, preview_rx) = crossbeam_channel::unbounded();
    let lines = spawn_stdin_reader();

    let mut repl = Repl {
        handle: controller.handle(),
        searches,
        results: SearchResults::default(),
        music_filter: options.music_filter,
        preview: Arc::new(PreviewClient::new(options.preview_timeout)),
        preview_tx,
        last_progress: None,
    };
    println!("youtufy ready; type help for commands");

    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(cmd)) => {
                        if !repl.execute(cmd)? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(msg) => println!("{msg}"),
                }
            }
            recv(events) -> event => {
                let Ok(event) = event else { break };
                repl.on_event(event);
            }
            recv(search_rx) -> outcome => {
                let Ok(outcome) = outcome else { continue };
                let failure = outcome.failure.clone();
                if repl.results.apply(outcome) {
                    match failure {
                        Some(reason) => println!("search failed: {reason}"),
                        None => repl.print_results(),
                    }
                }
            }
            recv(preview_rx) -> preview => {
                match preview {
                    Ok((id, Ok(image))) => println!(
                        "preview for {id}: {} ({}, {} bytes)",
                        image.url,
                        image.mime_type,
                        image.bytes.len()
                    ),
                    Ok((id, Err(e))) => tracing::info!(content_id = %id, error = %e, "no preview"),
                    Err(_) => {}
                }
            }
            recv(interrupt) -> _ => break,
        }
    }

    controller.shutdown();
    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = std::thread::Builder::new()
        .name("youtufy-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn stdin reader");
    }
    rx
}

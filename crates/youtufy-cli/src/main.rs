//! youtufy: search YouTube and play the audio of a result from the terminal.
//!
//! Search goes through the YouTube Data API, stream resolution through
//! `yt-dlp`, and playback through an `mpv` child process driven over IPC.

mod cli;
mod repl;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use tracing_subscriber::EnvFilter;
use youtufy_core::config::{AppConfig, SessionConfig};
use youtufy_core::controller::{self, SessionController};
use youtufy_core::progress::format_time_ms;
#[cfg(unix)]
use youtufy_core::resolver::YtDlpResolver;
use youtufy_core::search::{SearchBackend, YouTubeSearch};
use youtufy_core::SessionEvent;
use youtufy_types::PlaybackPhase;

fn main() -> Result<()> {
    let mut args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,youtufy_core=info")
        }))
        .init();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("load config {:?}", args.config))?;
    config.apply_env();
    if config.api_key().is_none() {
        tracing::warn!("no search API key configured; searches will fail");
    }

    let mut session_config = config.session();
    if let Some(volume) = args.volume {
        session_config.initial_volume = volume;
    }
    let music_filter = config.music_filter() && !args.no_music_filter;
    let search: Arc<dyn SearchBackend> =
        Arc::new(YouTubeSearch::new(config.api_key(), config.search_timeout()));

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    }) {
        tracing::warn!(error = %e, "failed to install interrupt handler");
    }

    match args.cmd.take().unwrap_or(cli::Command::Repl) {
        cli::Command::Search { query } => {
            let query = query.join(" ");
            let results = search
                .search(&query, music_filter)
                .with_context(|| format!("search {query:?}"))?;
            for (i, r) in results.iter().enumerate() {
                println!("{:>2}. {} [{}]", i + 1, r.title, r.content_id);
            }
            Ok(())
        }
        cli::Command::Play { content_id } => {
            let (controller, events) = start_session(&args, &config, session_config)?;
            play_once(controller, &events, &interrupt_rx, &content_id)
        }
        cli::Command::Repl => {
            let (controller, events) = start_session(&args, &config, session_config)?;
            let preview_timeout = config.search_timeout();
            repl::run(
                controller,
                events,
                search,
                repl::ReplOptions {
                    music_filter,
                    preview_timeout,
                },
                interrupt_rx,
            )
        }
    }
}

#[cfg(unix)]
fn start_session(
    args: &cli::Args,
    config: &AppConfig,
    session_config: SessionConfig,
) -> Result<(SessionController, Receiver<SessionEvent>)> {
    let ytdlp = args.ytdlp_path.clone().unwrap_or_else(|| config.ytdlp_path());
    let mpv = args.mpv_path.clone().unwrap_or_else(|| config.mpv_path());
    let resolver = Arc::new(YtDlpResolver::new(ytdlp, session_config.resolve_timeout));
    let engine = youtufy_core::mpv::MpvEngine::spawn(&mpv)
        .with_context(|| format!("start mpv {mpv:?}"))?;
    Ok(controller::spawn(engine, resolver, session_config))
}

#[cfg(not(unix))]
fn start_session(
    _args: &cli::Args,
    _config: &AppConfig,
    _session_config: SessionConfig,
) -> Result<(SessionController, Receiver<SessionEvent>)> {
    anyhow::bail!("mpv IPC playback is only supported on unix")
}

fn play_once(
    controller: SessionController,
    events: &Receiver<SessionEvent>,
    interrupt: &Receiver<()>,
    content_id: &str,
) -> Result<()> {
    let handle = controller.handle();
    handle.activate(content_id)?;
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                match event {
                    SessionEvent::NowPlaying { title, .. } => {
                        eprintln!("now playing: {title}");
                    }
                    SessionEvent::Progress(p) => {
                        eprint!("\r{} / {}", format_time_ms(p.position_ms), format_time_ms(p.duration_ms));
                    }
                    SessionEvent::Failure { kind, message } => {
                        eprintln!("\n{kind:?} failure: {message}");
                    }
                    SessionEvent::StateChanged(status) => match status.phase {
                        PlaybackPhase::Ended | PlaybackPhase::Idle => break,
                        _ => {}
                    },
                    SessionEvent::SelectionChanged { .. } => {}
                }
            }
            recv(interrupt) -> _ => break,
        }
    }
    eprintln!();
    controller.shutdown();
    Ok(())
}

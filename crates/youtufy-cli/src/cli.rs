use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "youtufy", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Path to the TOML config file
    #[arg(long, default_value = "youtufy.toml")]
    pub config: PathBuf,

    /// Override the mpv executable
    #[arg(long)]
    pub mpv_path: Option<PathBuf>,

    /// Override the yt-dlp executable
    #[arg(long)]
    pub ytdlp_path: Option<PathBuf>,

    /// Search all videos instead of biasing toward music
    #[arg(long)]
    pub no_music_filter: bool,

    /// Initial volume (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive session (default)
    Repl,

    /// Run one search and print the results
    Search {
        /// Search terms
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Resolve and play one content id until it ends
    Play {
        /// Catalog content id (video id)
        content_id: String,
    },
}

//! Relay: streams remote audio into a voice-style frame sink.
//!
//! ## Pipeline
//! 1. **Resolve**: `youtube-dl -j` turns a URL into a media URL plus duration.
//! 2. **Fetch**: ffmpeg transcodes fixed windows of the source into staged 48 kHz stereo WAVs,
//!    a few windows ahead of playback.
//! 3. **Encode**: each staged window is cut into 20 ms frames (PCM or Opus).
//! 4. **Sink**: frames are written, in real time, to a DCA-framed output file.
//!
//! ## Modes
//! - `run`: read control lines from stdin.
//! - `play`: play one URL and exit.

use anyhow::{Result, anyhow};
use clap::Parser;
use relay::cli::{Args, Command};
use relay::config::{RelayConfig, RelaySettings, TEMP_PREFIX};
use relay::{control, runtime};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,relay=info,segment_player=info")
        }))
        .init();

    let cfg = match args.config.as_ref() {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    let settings = RelaySettings::resolve(&cfg, args.output.clone(), args.temp_dir.clone());
    let temp_dir = settings.player.temp_dir.clone();

    match segment_player::cleanup_temp_files(&temp_dir, TEMP_PREFIX) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "cleaned up stale temp files"),
        Err(e) => tracing::warn!("temp cleanup warning: {e}"),
    }

    let temp_dir_for_signal = temp_dir.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = segment_player::cleanup_temp_files(&temp_dir_for_signal, TEMP_PREFIX);
        std::process::exit(130);
    });

    match args.cmd {
        Command::Run => runtime::run_control(settings).await,
        Command::Play {
            url,
            start,
            duration,
            end,
        } => {
            let request =
                control::track_request(&url, start, duration, end).map_err(|e| anyhow!(e))?;
            runtime::run_play(settings, request).await
        }
    }
}

//! Relay runtime.
//!
//! Wires the player to its production collaborators (youtube-dl resolver, ffmpeg transcoder,
//! DCA file sink) and drives it from stdin or from a single `play` request.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use relay_types::{PlaybackEndReason, PlaybackEvent, TrackRequest};
use segment_player::{FfmpegTranscoder, Player, YtdlResolver};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::RelaySettings;
use crate::control::{Control, parse_line};
use crate::dca::DcaFileConnector;

/// Build a player with the production collaborators.
pub fn spawn_player(settings: &RelaySettings) -> Result<Player> {
    let connector = DcaFileConnector::new(&settings.output, settings.player.frame_duration());
    let player = Player::spawn(
        settings.player.clone(),
        settings.target,
        Arc::new(YtdlResolver::new(&settings.youtube_dl)),
        Arc::new(FfmpegTranscoder::new(&settings.ffmpeg)),
        Arc::new(connector),
    )
    .context("start player")?;
    tracing::info!(
        output = %settings.output.display(),
        window_secs = settings.player.window.as_secs(),
        preload = settings.player.preload_segments,
        codec = ?settings.player.codec,
        "player ready"
    );
    Ok(player)
}

/// Log player events until the stream closes.
fn spawn_event_logger(mut events: broadcast::Receiver<PlaybackEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::TrackStarted {
            url,
            title,
            start_ms,
            end_ms,
        } => tracing::info!(
            url = %url,
            title = title.as_deref().unwrap_or(""),
            start_ms,
            end_ms,
            "now playing"
        ),
        PlaybackEvent::StateChanged { state } => tracing::debug!(state = %state, "state"),
        PlaybackEvent::TrackEnded {
            url,
            reason,
            frames_sent,
            error,
        } => match error {
            Some(err) => tracing::warn!(url = %url, frames_sent, "track ended with error: {err}"),
            None => tracing::info!(url = %url, frames_sent, reason = ?reason, "track ended"),
        },
        PlaybackEvent::QueueCleared { dropped } => tracing::info!(dropped, "queue cleared"),
    }
}

/// Read control lines from stdin until EOF, then let the queue play out and stop.
pub async fn run_control(settings: RelaySettings) -> Result<()> {
    let player = Arc::new(spawn_player(&settings)?);
    let logger = spawn_event_logger(player.subscribe());
    let mut enqueues = JoinSet::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("reading control commands from stdin");
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Control::Command(command))) => player.send(command),
            Ok(Some(Control::Enqueue(request))) => {
                // Resolution can take seconds; keep reading commands meanwhile.
                let player = player.clone();
                enqueues.spawn(async move {
                    let url = request.url.clone();
                    match player.enqueue(request).await {
                        Ok(()) => tracing::info!(url = %url, "queued"),
                        Err(e) => tracing::warn!(url = %url, "enqueue rejected: {e}"),
                    }
                });
            }
            Err(e) => tracing::warn!("{e}"),
        }
        while enqueues.try_join_next().is_some() {}
    }

    tracing::info!("stdin closed, playing out the queue");
    while let Some(joined) = enqueues.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("enqueue task failed: {e}");
        }
    }
    match Arc::try_unwrap(player) {
        Ok(player) => player.finish().await,
        Err(_) => tracing::warn!("player still shared at shutdown"),
    }
    logger.abort();
    Ok(())
}

/// Play one request and wait for it to finish.
pub async fn run_play(settings: RelaySettings, request: TrackRequest) -> Result<()> {
    let player = spawn_player(&settings)?;
    let mut events = player.subscribe();
    let url = request.url.clone();
    player
        .enqueue(request)
        .await
        .with_context(|| format!("enqueue {url}"))?;

    let outcome = loop {
        match events.recv().await {
            Ok(event) => {
                log_event(&event);
                if let PlaybackEvent::TrackEnded { reason, error, .. } = event {
                    break (reason, error);
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                break (
                    PlaybackEndReason::Error,
                    Some("player stopped unexpectedly".to_string()),
                );
            }
        }
    };
    player.shutdown().await;

    match outcome {
        (PlaybackEndReason::Error, error) => Err(anyhow!(
            "playback of {url} failed: {}",
            error.unwrap_or_default()
        )),
        _ => Ok(()),
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Control commands accepted by the player.
///
/// Only the most recent unconsumed command is observed; a command sent while another
/// is still pending replaces it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackCommand {
    /// Start or resume forwarding frames.
    Play,
    /// Stop forwarding frames and hold the current position.
    Pause,
    /// Abandon the current track and move on to the next queued one.
    Skip,
    /// Abandon the current track and every queued track.
    Clear,
}

impl FromStr for PlaybackCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" | "resume" => Ok(PlaybackCommand::Play),
            "pause" => Ok(PlaybackCommand::Pause),
            "skip" => Ok(PlaybackCommand::Skip),
            "clear" | "die" | "stop" => Ok(PlaybackCommand::Clear),
            other => Err(format!("unknown playback command: {other}")),
        }
    }
}

/// Reason why a track stopped feeding the sink.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Every scheduled segment was played.
    Eof,
    /// A skip command abandoned the track.
    Skipped,
    /// A clear command abandoned the track and the pending queue.
    Cleared,
    /// Fetch, decode, encode, or sink failure ended the track.
    Error,
}

/// Player state as seen by event subscribers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    /// Discarding the remaining segments of a cleared track.
    Draining,
    /// Terminal for one track; the player moves to the next track or to idle.
    Stopped,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerState::Idle => "idle",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Draining => "draining",
            PlayerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A request to play `url` from `start_ms` for `duration_ms`.
///
/// A zero duration means "until the end of the source".
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackRequest {
    /// Source locator handed to the resolver.
    pub url: String,
    /// Requested start offset in milliseconds.
    #[serde(default)]
    pub start_ms: u64,
    /// Requested duration in milliseconds (`0` = to end).
    #[serde(default)]
    pub duration_ms: u64,
}

impl TrackRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            start_ms: 0,
            duration_ms: 0,
        }
    }

    pub fn with_start_ms(mut self, start_ms: u64) -> Self {
        self.start_ms = start_ms;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Lifecycle signals published by the player.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// A track became current and its scheduler was started.
    TrackStarted {
        url: String,
        title: Option<String>,
        start_ms: u64,
        end_ms: u64,
    },
    /// The player changed state.
    StateChanged { state: PlayerState },
    /// A track stopped feeding the sink.
    TrackEnded {
        url: String,
        reason: PlaybackEndReason,
        frames_sent: u64,
        error: Option<String>,
    },
    /// A clear command dropped `dropped` pending tracks.
    QueueCleared { dropped: usize },
}

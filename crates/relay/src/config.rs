//! Configuration loading and parsing.
//!
//! Defines the relay config schema (TOML) and resolves it onto player defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use segment_player::{CodecKind, PlayerConfig, SinkTarget};
use serde::Deserialize;

const DEFAULT_OUTPUT: &str = "relay-output.dca";
/// Playback gain used when the config leaves `volume` unset.
pub const DEFAULT_VOLUME: f32 = 0.10;
pub const TEMP_PREFIX: &str = "relay";

/// Top-level relay configuration loaded from TOML. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Voice group (guild) the sink attaches to.
    pub guild_id: Option<u64>,
    /// Voice channel within the group.
    pub voice_channel_id: Option<u64>,
    /// Maximum tracks waiting behind the current one.
    pub queue_size: Option<usize>,
    /// Segment window length in seconds.
    pub window_secs: Option<u64>,
    /// Ready segments kept ahead of playback.
    pub preload_segments: Option<usize>,
    /// Samples per channel per frame (960 = 20 ms).
    pub frame_samples: Option<usize>,
    /// `pcm` or `opus`.
    pub codec: Option<CodecKind>,
    /// Linear playback gain, 0.0 to 2.0.
    pub volume: Option<f32>,
    /// Delay before retrying a failed attach, in milliseconds.
    pub attach_backoff_ms: Option<u64>,
    /// Idle seconds before the sink detaches (0 disables).
    pub idle_detach_secs: Option<u64>,
    /// Directory for staged segment files.
    pub temp_dir: Option<PathBuf>,
    /// ffmpeg executable.
    pub ffmpeg: Option<PathBuf>,
    /// youtube-dl compatible resolver executable.
    pub youtube_dl: Option<PathBuf>,
    /// DCA output file.
    pub output: Option<PathBuf>,
}

impl RelayConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<RelayConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Resolve player tuning from config, falling back to player defaults.
pub fn player_config_from_config(cfg: &RelayConfig, temp_dir: Option<PathBuf>) -> PlayerConfig {
    let defaults = PlayerConfig::default();
    PlayerConfig {
        window: cfg
            .window_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.window),
        preload_segments: cfg.preload_segments.unwrap_or(defaults.preload_segments),
        frame_samples: cfg.frame_samples.unwrap_or(defaults.frame_samples),
        codec: cfg.codec.unwrap_or(defaults.codec),
        volume: cfg.volume.unwrap_or(DEFAULT_VOLUME),
        attach_backoff: cfg
            .attach_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.attach_backoff),
        idle_detach: match cfg.idle_detach_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_detach,
        },
        max_pending_tracks: cfg.queue_size.unwrap_or(defaults.max_pending_tracks),
        temp_dir: temp_dir
            .or_else(|| cfg.temp_dir.clone())
            .unwrap_or(defaults.temp_dir),
        temp_prefix: TEMP_PREFIX.to_string(),
        ..defaults
    }
}

pub fn sink_target_from_config(cfg: &RelayConfig) -> SinkTarget {
    SinkTarget {
        group_id: cfg.guild_id.unwrap_or_default(),
        channel_id: cfg.voice_channel_id.unwrap_or_default(),
    }
}

pub fn ffmpeg_from_config(cfg: &RelayConfig) -> PathBuf {
    cfg.ffmpeg.clone().unwrap_or_else(|| PathBuf::from("ffmpeg"))
}

pub fn youtube_dl_from_config(cfg: &RelayConfig) -> PathBuf {
    cfg.youtube_dl
        .clone()
        .unwrap_or_else(|| PathBuf::from("youtube-dl"))
}

/// Output path: CLI override, then config, then the default file name.
pub fn output_from_config(cfg: &RelayConfig, cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| cfg.output.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
}

/// Everything the runtime needs, resolved.
#[derive(Clone, Debug)]
pub struct RelaySettings {
    pub player: PlayerConfig,
    pub target: SinkTarget,
    pub ffmpeg: PathBuf,
    pub youtube_dl: PathBuf,
    pub output: PathBuf,
}

impl RelaySettings {
    pub fn resolve(cfg: &RelayConfig, output: Option<PathBuf>, temp_dir: Option<PathBuf>) -> Self {
        Self {
            player: player_config_from_config(cfg, temp_dir),
            target: sink_target_from_config(cfg),
            ffmpeg: ffmpeg_from_config(cfg),
            youtube_dl: youtube_dl_from_config(cfg),
            output: output_from_config(cfg, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_player_defaults() {
        let cfg: RelayConfig = toml::from_str("").unwrap();
        let player = player_config_from_config(&cfg, None);
        let defaults = PlayerConfig::default();
        assert_eq!(player.window, defaults.window);
        assert_eq!(player.preload_segments, 5);
        assert_eq!(player.idle_detach, Some(Duration::from_secs(30)));
        assert_eq!(player.temp_prefix, TEMP_PREFIX);
        assert_eq!(player.volume, DEFAULT_VOLUME);
        assert!(player.validate().is_ok());
        assert_eq!(output_from_config(&cfg, None), PathBuf::from(DEFAULT_OUTPUT));
    }

    #[test]
    fn config_fields_override_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            guild_id = 42
            voice_channel_id = 7
            queue_size = 3
            window_secs = 5
            codec = "pcm"
            volume = 0.5
            idle_detach_secs = 0
            ffmpeg = "/opt/ffmpeg"
            output = "/tmp/a.dca"
            "#,
        )
        .unwrap();
        let player = player_config_from_config(&cfg, None);
        assert_eq!(player.window, Duration::from_secs(5));
        assert_eq!(player.max_pending_tracks, 3);
        assert_eq!(player.idle_detach, None);
        assert_eq!(player.volume, 0.5);
        assert_eq!(
            sink_target_from_config(&cfg),
            SinkTarget {
                group_id: 42,
                channel_id: 7
            }
        );
        assert_eq!(ffmpeg_from_config(&cfg), PathBuf::from("/opt/ffmpeg"));
        assert_eq!(
            output_from_config(&cfg, Some(PathBuf::from("/cli.dca"))),
            PathBuf::from("/cli.dca")
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<RelayConfig>("bogus = 1").is_err());
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "window_secs = \"ten\"").unwrap();
        let err = RelayConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("relay.toml"));
    }
}

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encode::CodecKind;
use crate::error::ConfigError;

/// Frame sizes (samples per channel) accepted by the Opus encoder at 48 kHz.
const VALID_FRAME_SAMPLES: [usize; 6] = [120, 240, 480, 960, 1920, 2880];
/// Upper bound for the playback gain.
pub const MAX_VOLUME: f32 = 2.0;

/// Player tuning parameters shared by the scheduler, encoder, and state machine.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Length of one fetched segment.
    pub window: Duration,
    /// Ready segments held ahead of playback (preload queue bound).
    pub preload_segments: usize,
    /// Samples per channel in one encoded frame (960 = 20 ms).
    pub frame_samples: usize,
    /// Encoded frames buffered between an encode task and the state machine.
    pub frame_buffer: usize,
    /// Frame codec.
    pub codec: CodecKind,
    /// Linear gain applied to every sample before encoding (1.0 = unchanged).
    pub volume: f32,
    /// Delay before the single retry of a failed sink attach.
    pub attach_backoff: Duration,
    /// Detach the sink after this long without a track; `None` keeps it attached.
    pub idle_detach: Option<Duration>,
    /// Maximum tracks waiting behind the current one.
    pub max_pending_tracks: usize,
    /// Directory for staged segment files.
    pub temp_dir: PathBuf,
    /// File name prefix for staged segment files.
    pub temp_prefix: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            preload_segments: 5,
            frame_samples: 960,
            frame_buffer: 50,
            codec: CodecKind::default(),
            volume: 1.0,
            attach_backoff: Duration::from_secs(1),
            idle_detach: Some(Duration::from_secs(30)),
            max_pending_tracks: 32,
            temp_dir: std::env::temp_dir(),
            temp_prefix: "segment-player".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::Invalid("window must be non-zero".to_string()));
        }
        if self.preload_segments == 0 {
            return Err(ConfigError::Invalid(
                "preload_segments must be at least 1".to_string(),
            ));
        }
        if !VALID_FRAME_SAMPLES.contains(&self.frame_samples) {
            return Err(ConfigError::Invalid(format!(
                "frame_samples must be one of {VALID_FRAME_SAMPLES:?}, got {}",
                self.frame_samples
            )));
        }
        if !(0.0..=MAX_VOLUME).contains(&self.volume) {
            return Err(ConfigError::Invalid(format!(
                "volume must be within 0.0..={MAX_VOLUME}, got {}",
                self.volume
            )));
        }
        if self.frame_buffer == 0 {
            return Err(ConfigError::Invalid("frame_buffer must be at least 1".to_string()));
        }
        if self.max_pending_tracks == 0 {
            return Err(ConfigError::Invalid(
                "max_pending_tracks must be at least 1".to_string(),
            ));
        }
        #[cfg(not(feature = "opus"))]
        if self.codec == CodecKind::Opus {
            return Err(ConfigError::Invalid(
                "codec \"opus\" needs the `opus` feature".to_string(),
            ));
        }
        if self.temp_prefix.trim().is_empty() || self.temp_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "temp_prefix is not a plain file name prefix: {:?}",
                self.temp_prefix
            )));
        }
        Ok(())
    }

    /// Playback length of one encoded frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / crate::encode::SAMPLE_RATE as u64)
    }
}

/// Where the sink should attach (voice group and channel).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkTarget {
    pub group_id: u64,
    pub channel_id: u64,
}

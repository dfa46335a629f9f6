//! Segmented audio relay core.
//!
//! A track is fetched window by window through an external transcoder, each window is
//! encoded into fixed-duration frames, and a single playback actor forwards those frames
//! to an output sink while giving control commands priority over data.

pub mod config;
pub mod encode;
pub mod error;
pub mod events;
pub mod fetch;
mod playback;
pub mod player;
pub mod resolve;
pub mod schedule;
pub mod sink;
pub mod staging;
pub mod transcode;

#[cfg(test)]
mod test_support;

pub use config::{PlayerConfig, SinkTarget};
pub use encode::{CodecKind, Frame};
pub use error::{ConfigError, EnqueueError, SegmentError, SinkError};
pub use player::Player;
pub use resolve::{ResolvedSource, SourceResolver, YtdlResolver};
pub use schedule::Window;
pub use sink::{SinkConnector, SinkHandle};
pub use staging::{StagingStats, cleanup_temp_files};
pub use transcode::{FfmpegTranscoder, Transcoder};

//! Error types for the segment player.
//!
//! Segment errors end the current track; sink errors end the current track or fail an
//! enqueue; enqueue errors are the only ones surfaced to callers directly.

use thiserror::Error;

/// Failures while producing or decoding one segment.
#[derive(Error, Debug)]
pub enum SegmentError {
    /// The transcoder could not be run, exited non-zero, or wrote nothing.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The staged audio is not 48 kHz stereo PCM.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The frame codec rejected a batch.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Staging or decoding I/O failed.
    #[error("segment io: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the output transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink attach failed: {0}")]
    AttachFailed(String),

    /// The transport closed while frames were being sent.
    #[error("sink send failed: {0}")]
    SendFailed(String),
}

/// Reasons an enqueue request is refused.
#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("invalid track request: {0}")]
    InvalidRequest(String),

    /// Source metadata lookup failed.
    #[error("source lookup failed: {0}")]
    Resolve(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("queue full ({0} tracks pending)")]
    QueueFull(usize),

    /// The player task has stopped.
    #[error("player is shut down")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid player config: {0}")]
    Invalid(String),

    #[error("temp dir {path}: {source}")]
    TempDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

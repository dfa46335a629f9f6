//! DCA-style frame file sink.
//!
//! Each frame is written as a little-endian `i16` byte length followed by the payload.
//! Writes are paced to the frame duration so the file fills in real time, the way a live
//! voice transport would consume it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use segment_player::{Frame, SinkConnector, SinkError, SinkHandle, SinkTarget};
use tokio::time::{Interval, MissedTickBehavior};

/// Opens (appends to) one output file per attachment.
#[derive(Clone, Debug)]
pub struct DcaFileConnector {
    path: PathBuf,
    frame_duration: Duration,
}

impl DcaFileConnector {
    pub fn new(path: impl Into<PathBuf>, frame_duration: Duration) -> Self {
        Self {
            path: path.into(),
            frame_duration,
        }
    }
}

#[async_trait]
impl SinkConnector for DcaFileConnector {
    async fn attach(&self, target: &SinkTarget) -> Result<Box<dyn SinkHandle>, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SinkError::AttachFailed(format!("open {:?}: {e}", self.path)))?;
        tracing::info!(
            path = %self.path.display(),
            group_id = target.group_id,
            channel_id = target.channel_id,
            "dca output opened"
        );

        // Zero frame duration disables pacing.
        let pacer = (!self.frame_duration.is_zero()).then(|| {
            let mut pacer = tokio::time::interval(self.frame_duration);
            pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            pacer
        });
        Ok(Box::new(DcaFileSink {
            out: BufWriter::new(file),
            pacer,
            frames: 0,
        }))
    }
}

struct DcaFileSink {
    out: BufWriter<File>,
    pacer: Option<Interval>,
    frames: u64,
}

/// Append one length-prefixed frame.
fn write_frame(out: &mut impl Write, payload: &[u8]) -> Result<(), SinkError> {
    let len = i16::try_from(payload.len()).map_err(|_| {
        SinkError::SendFailed(format!("frame of {} bytes is too large", payload.len()))
    })?;
    out.write_all(&len.to_le_bytes())
        .and_then(|()| out.write_all(payload))
        .map_err(|e| SinkError::SendFailed(e.to_string()))
}

#[async_trait]
impl SinkHandle for DcaFileSink {
    async fn set_speaking(&mut self, speaking: bool) -> Result<(), SinkError> {
        tracing::debug!(speaking, "speaking flag");
        if !speaking {
            self.out
                .flush()
                .map_err(|e| SinkError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.tick().await;
        }
        write_frame(&mut self.out, frame.as_bytes())?;
        self.frames += 1;
        Ok(())
    }

    async fn detach(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::warn!("dca output flush failed: {e}");
        }
        tracing::info!(frames = self.frames, "dca output closed");
    }
}

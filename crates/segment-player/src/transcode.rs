//! External transcoder collaborator.
//!
//! A transcoder materializes one window of a source as a 48 kHz stereo s16le WAV file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::encode::{CHANNELS, SAMPLE_RATE};
use crate::error::SegmentError;
use crate::resolve::ResolvedSource;
use crate::schedule::Window;

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write `window` of `source` to `dest` (which already exists and may be overwritten).
    async fn transcode(
        &self,
        source: &ResolvedSource,
        window: &Window,
        dest: &Path,
    ) -> Result<(), SegmentError>;
}

/// `ffmpeg` process per window. The child is killed if the fetch future is dropped.
#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one window; `-t` is left out when the window runs to the source end.
    pub fn args(source: &ResolvedSource, window: &Window, dest: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            seconds(window.start).into(),
            "-i".into(),
            source.media_url.as_str().into(),
            "-c:a".into(),
            "pcm_s16le".into(),
            "-f".into(),
            "wav".into(),
            "-ar".into(),
            SAMPLE_RATE.to_string().into(),
            "-ac".into(),
            CHANNELS.to_string().into(),
            "-vn".into(),
            "-y".into(),
        ];
        let runs_to_end = source
            .duration
            .is_some_and(|total| window.end() >= total);
        if !runs_to_end {
            args.push("-t".into());
            args.push(seconds(window.duration).into());
        }
        args.push(dest.as_os_str().to_owned());
        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

fn seconds(d: std::time::Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &ResolvedSource,
        window: &Window,
        dest: &Path,
    ) -> Result<(), SegmentError> {
        let output = Command::new(&self.program)
            .args(Self::args(source, window, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SegmentError::FetchFailed(format!("spawn {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SegmentError::FetchFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

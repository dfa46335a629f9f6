//! Segment fetcher: one window in, one opened segment out.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::encode::SegmentAudio;
use crate::error::SegmentError;
use crate::resolve::ResolvedSource;
use crate::schedule::Window;
use crate::staging::{StagedFile, StagingArea};
use crate::transcode::Transcoder;

/// A canonical PCM WAV header; a file no larger than this holds no samples.
const WAV_HEADER_LEN: u64 = 44;

/// One fetched window: validated decoder plus the staged file backing it.
///
/// Move-only. Dropping it closes the decoder and then removes the file.
pub struct Segment {
    window: Window,
    // Field order matters: `audio` must drop before `file`.
    pub(crate) audio: SegmentAudio,
    file: StagedFile,
}

impl Segment {
    pub fn index(&self) -> usize {
        self.window.index
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open an already-written staged file as a segment.
    pub(crate) fn open(window: Window, file: StagedFile) -> Result<Self, SegmentError> {
        let audio = SegmentAudio::open(file.path())?;
        Ok(Self {
            window,
            audio,
            file,
        })
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("window", &self.window)
            .field("path", &self.file.path())
            .finish()
    }
}

#[derive(Clone)]
pub struct SegmentFetcher {
    transcoder: Arc<dyn Transcoder>,
    staging: StagingArea,
}

impl SegmentFetcher {
    pub fn new(transcoder: Arc<dyn Transcoder>, staging: StagingArea) -> Self {
        Self {
            transcoder,
            staging,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Stage, transcode and open `window` of `source`.
    ///
    /// Returns `Ok(None)` when `cancel` fires while the transcoder runs. Once the transcoder
    /// has finished, the open always runs to completion so the staged file is owned by this
    /// call until it returns. The staged file is released before any error returns.
    pub async fn fetch(
        &self,
        source: &ResolvedSource,
        window: Window,
        cancel: &CancellationToken,
    ) -> Result<Option<Segment>, SegmentError> {
        let file = self.staging.stage(&format!("w{}", window.index))?;
        tracing::debug!(
            url = %source.url,
            window = window.index,
            start_ms = window.start.as_millis() as u64,
            duration_ms = window.duration.as_millis() as u64,
            "fetching segment"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = self.transcoder.transcode(source, &window, file.path()) => result?,
        }

        let size = file.size_on_disk()?;
        if size <= WAV_HEADER_LEN {
            return Err(SegmentError::FetchFailed(format!(
                "transcoder wrote no audio for window {} ({size} bytes)",
                window.index
            )));
        }

        let segment = tokio::task::spawn_blocking(move || open_with_audio(window, file))
            .await
            .map_err(|e| SegmentError::Io(io::Error::other(e)))??;
        Ok(Some(segment))
    }
}

/// Open a staged file and reject one whose data chunk holds no samples.
///
/// ffmpeg writes extra chunks (`LIST`/`INFO`) ahead of `data`, so an empty result is larger
/// than a bare header.
fn open_with_audio(window: Window, file: StagedFile) -> Result<Segment, SegmentError> {
    let segment = Segment::open(window, file)?;
    if segment.audio.n_frames() == Some(0) {
        return Err(SegmentError::FetchFailed(format!(
            "transcoder wrote an empty data chunk for window {}",
            window.index
        )));
    }
    Ok(segment)
}

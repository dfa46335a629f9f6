use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::encode::SAMPLE_RATE;
use crate::error::SegmentError;
use crate::fetch::Segment;
use crate::resolve::ResolvedSource;
use crate::schedule::Window;
use crate::staging::StagingArea;
use crate::transcode::Transcoder;

/// Write a 16-bit WAV where every channel of frame `i` holds `sample(i)`.
pub(crate) fn write_wav(
    path: &Path,
    channels: u16,
    sample_rate: u32,
    frames: usize,
    sample: impl Fn(usize) -> i16,
) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let value = sample(i);
        for _ in 0..channels {
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Stage and open a stereo 48 kHz segment of `frames` frames.
pub(crate) fn stage_segment(
    dir: &Path,
    index: usize,
    frames: usize,
    sample: impl Fn(usize) -> i16,
) -> (StagingArea, Segment) {
    let area = StagingArea::new(dir, "t").unwrap();
    let file = area.stage(&format!("w{index}")).unwrap();
    write_wav(file.path(), 2, SAMPLE_RATE, frames, sample);
    let window = Window {
        index,
        start: Duration::ZERO,
        duration: Duration::from_millis((frames as u64 * 1000) / SAMPLE_RATE as u64),
    };
    let segment = Segment::open(window, file).unwrap();
    (area, segment)
}

pub(crate) fn source(secs: u64) -> ResolvedSource {
    ResolvedSource {
        url: "test://track".to_string(),
        media_url: "test://media".to_string(),
        title: Some("Test".to_string()),
        duration: Some(Duration::from_secs(secs)),
    }
}

/// A stereo 48 kHz WAV laid out the way ffmpeg writes it (`fmt `, `LIST`/`INFO`, `data`)
/// with an empty data chunk.
pub(crate) fn header_only_wav() -> Vec<u8> {
    let mut info = Vec::new();
    info.extend_from_slice(b"INFO");
    info.extend_from_slice(b"ISFT");
    info.extend_from_slice(&14u32.to_le_bytes());
    info.extend_from_slice(b"Lavf60.16.100\0");

    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");
    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&2u16.to_le_bytes());
    body.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    body.extend_from_slice(&(SAMPLE_RATE * 4).to_le_bytes());
    body.extend_from_slice(&4u16.to_le_bytes());
    body.extend_from_slice(&16u16.to_le_bytes());
    body.extend_from_slice(b"LIST");
    body.extend_from_slice(&(info.len() as u32).to_le_bytes());
    body.extend_from_slice(&info);
    body.extend_from_slice(b"data");
    body.extend_from_slice(&0u32.to_le_bytes());

    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(body.len() as u32).to_le_bytes());
    wav.extend_from_slice(&body);
    wav
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Output {
    Samples,
    Nothing,
    HeaderOnly,
}

/// Writes a WAV per window (or nothing, or a scripted failure) and counts calls.
pub(crate) struct ScriptedTranscoder {
    channels: u16,
    output: Output,
    fail_at: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedTranscoder {
    fn with_channels(channels: u16) -> Self {
        Self {
            channels,
            output: Output::Samples,
            fail_at: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn stereo() -> Self {
        Self::with_channels(2)
    }

    pub(crate) fn mono() -> Self {
        Self::with_channels(1)
    }

    pub(crate) fn silent() -> Self {
        Self {
            output: Output::Nothing,
            ..Self::stereo()
        }
    }

    pub(crate) fn header_only() -> Self {
        Self {
            output: Output::HeaderOnly,
            ..Self::stereo()
        }
    }

    pub(crate) fn failing_at(mut self, window: usize) -> Self {
        self.fail_at = Some(window);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn transcode(
        &self,
        _source: &ResolvedSource,
        window: &Window,
        dest: &Path,
    ) -> Result<(), SegmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(window.index) {
            return Err(SegmentError::FetchFailed("scripted failure".to_string()));
        }
        match self.output {
            Output::Nothing => return Ok(()),
            Output::HeaderOnly => {
                std::fs::write(dest, header_only_wav())?;
                return Ok(());
            }
            Output::Samples => {}
        }
        let frames = window.duration.as_millis() as usize * (SAMPLE_RATE as usize / 1000);
        write_wav(dest, self.channels, SAMPLE_RATE, frames, |i| (i / 960) as i16);
        Ok(())
    }
}

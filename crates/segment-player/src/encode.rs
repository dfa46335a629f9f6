//! Segment decode + frame encode stage.
//!
//! Uses Symphonia to:
//! - probe a staged WAV segment and check it is 48 kHz stereo
//! - decode packets into interleaved `i16` samples
//! - cut the samples into fixed-size batches and hand each batch to a [`FrameCodec`]
//!
//! [`FrameEncoder`] is the lazy frame sequence; [`spawn_encoder`] runs it on a blocking
//! thread and pushes frames into a bounded channel.

use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SegmentError;
use crate::fetch::Segment;

/// Sample rate every staged segment must have.
pub const SAMPLE_RATE: u32 = 48_000;
/// Channel count every staged segment must have.
pub const CHANNELS: usize = 2;

#[cfg(feature = "opus")]
const MAX_OPUS_PACKET: usize = 4000;

/// One encoded unit of audio ready for the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Encodes one full batch of interleaved stereo samples into a frame payload.
pub trait FrameCodec: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, SegmentError>;
}

/// Frame payload = the batch as interleaved little-endian `i16`.
#[derive(Debug, Default)]
pub struct PcmCodec;

impl FrameCodec for PcmCodec {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, SegmentError> {
        let mut out = Vec::with_capacity(pcm.len() * 2);
        for sample in pcm {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(out)
    }
}

#[cfg(feature = "opus")]
pub struct OpusCodec {
    encoder: opus::Encoder,
}

#[cfg(feature = "opus")]
impl OpusCodec {
    pub fn new() -> Result<Self, SegmentError> {
        let encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Stereo, opus::Application::Audio)
            .map_err(|e| SegmentError::Encode(format!("create opus encoder: {e}")))?;
        Ok(Self { encoder })
    }
}

#[cfg(feature = "opus")]
impl FrameCodec for OpusCodec {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, SegmentError> {
        self.encoder
            .encode_vec(pcm, MAX_OPUS_PACKET)
            .map_err(|e| SegmentError::Encode(e.to_string()))
    }
}

/// Codec selection, as carried in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Pcm,
    Opus,
}

impl CodecKind {
    /// Build a fresh codec instance (one per segment).
    pub fn build(self) -> Result<Box<dyn FrameCodec>, SegmentError> {
        match self {
            CodecKind::Pcm => Ok(Box::new(PcmCodec)),
            #[cfg(feature = "opus")]
            CodecKind::Opus => Ok(Box::new(OpusCodec::new()?)),
            #[cfg(not(feature = "opus"))]
            CodecKind::Opus => Err(SegmentError::Encode(
                "built without the `opus` feature".to_string(),
            )),
        }
    }
}

/// An opened, validated segment decoder.
pub struct SegmentAudio {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    n_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<i16>>,
}

impl SegmentAudio {
    /// Probe `path` and check the format preconditions (2 channels, 48 kHz).
    ///
    /// Fails with [`SegmentError::UnsupportedFormat`] before any sample is read.
    pub fn open(path: &Path) -> Result<Self, SegmentError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("wav");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| SegmentError::UnsupportedFormat(format!("probe: {e}")))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| SegmentError::UnsupportedFormat("no audio track".to_string()))?;
        let codec_params = track.codec_params.clone();
        let track_id = track.id;

        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        if channels != CHANNELS {
            return Err(SegmentError::UnsupportedFormat(format!(
                "expected {CHANNELS} channels, found {channels}"
            )));
        }
        let rate = codec_params.sample_rate.unwrap_or(0);
        if rate != SAMPLE_RATE {
            return Err(SegmentError::UnsupportedFormat(format!(
                "expected {SAMPLE_RATE} Hz, found {rate} Hz"
            )));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| SegmentError::UnsupportedFormat(format!("decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            n_frames: codec_params.n_frames,
            sample_buf: None,
        })
    }

    /// Sample frames per channel declared by the container, if it states a length.
    pub fn n_frames(&self) -> Option<u64> {
        self.n_frames
    }

    /// Decode the next packet and append its interleaved samples to `out`.
    ///
    /// Returns `Ok(false)` at end of segment.
    fn read_into(&mut self, out: &mut Vec<i16>) -> Result<bool, SegmentError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => return Err(SegmentError::Io(io::Error::other(e.to_string()))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(SegmentError::Io(io::Error::other(e.to_string()))),
            };

            let capacity = decoded.capacity() as u64;
            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if self
                .sample_buf
                .as_ref()
                .is_some_and(|buf| buf.capacity() < needed)
            {
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::<i16>::new(capacity, spec));
            buf.copy_interleaved_ref(decoded);
            out.extend_from_slice(buf.samples());
            return Ok(true);
        }
    }
}

/// Lazy, finite, non-restartable frame sequence over one segment.
///
/// Owns the segment; dropping the encoder closes the decoder and releases the staged file.
pub struct FrameEncoder {
    segment: Segment,
    codec: Box<dyn FrameCodec>,
    batch_len: usize,
    gain: f32,
    pending: Vec<i16>,
    exhausted: bool,
    done: bool,
}

impl FrameEncoder {
    /// `frame_samples` is per channel; one batch holds `frame_samples * CHANNELS` samples.
    pub fn new(segment: Segment, codec: Box<dyn FrameCodec>, frame_samples: usize) -> Self {
        let batch_len = frame_samples * CHANNELS;
        Self {
            segment,
            codec,
            batch_len,
            gain: 1.0,
            pending: Vec::with_capacity(batch_len * 2),
            exhausted: false,
            done: false,
        }
    }

    /// Scale every sample by `gain` before encoding, saturating at the `i16` range.
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }
}

fn apply_gain(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples {
        // `as` saturates float to int conversions.
        *sample = (f32::from(*sample) * gain).round() as i16;
    }
}

impl Iterator for FrameEncoder {
    type Item = Result<Frame, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.pending.len() < self.batch_len && !self.exhausted {
            match self.segment.audio.read_into(&mut self.pending) {
                Ok(true) => {}
                Ok(false) => self.exhausted = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if self.pending.is_empty() {
            self.done = true;
            return None;
        }
        // End-of-segment tail: pad with silence to one full frame.
        if self.pending.len() < self.batch_len {
            self.pending.resize(self.batch_len, 0);
        }

        apply_gain(&mut self.pending[..self.batch_len], self.gain);
        let encoded = self.codec.encode(&self.pending[..self.batch_len]);
        self.pending.drain(..self.batch_len);
        match encoded {
            Ok(bytes) => Some(Ok(Frame(bytes))),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Result of one encode task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeSummary {
    pub segment: usize,
    pub frames: u64,
    /// `true` when the task ended because of a stop request or a dropped receiver.
    pub stopped: bool,
}

/// Stream `segment` as frames on a blocking thread.
///
/// Frames arrive on the returned receiver in production order; at most `buffer` frames wait
/// in the channel. Cancelling `stop` or dropping the receiver ends the task within one batch.
/// The segment is released before the join handle resolves.
pub fn spawn_encoder(
    segment: Segment,
    codec: CodecKind,
    frame_samples: usize,
    gain: f32,
    buffer: usize,
    stop: CancellationToken,
) -> (
    mpsc::Receiver<Frame>,
    JoinHandle<Result<EncodeSummary, SegmentError>>,
) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        let index = segment.index();
        let codec = codec.build()?;
        let encoder = FrameEncoder::new(segment, codec, frame_samples).with_gain(gain);
        let summary = stream_frames(encoder, &tx, &stop)?;
        tracing::debug!(
            segment = index,
            frames = summary.frames,
            stopped = summary.stopped,
            "segment encode finished"
        );
        Ok(summary)
    });
    (rx, handle)
}

fn stream_frames(
    mut encoder: FrameEncoder,
    tx: &mpsc::Sender<Frame>,
    stop: &CancellationToken,
) -> Result<EncodeSummary, SegmentError> {
    let mut summary = EncodeSummary {
        segment: encoder.segment().index(),
        frames: 0,
        stopped: false,
    };
    loop {
        if stop.is_cancelled() {
            summary.stopped = true;
            break;
        }
        let Some(frame) = encoder.next() else {
            break;
        };
        let frame = frame?;
        if stop.is_cancelled() || tx.blocking_send(frame).is_err() {
            summary.stopped = true;
            break;
        }
        summary.frames += 1;
    }
    Ok(summary)
}

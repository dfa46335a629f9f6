#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_types::PlaybackEvent;
use segment_player::{
    Frame, PlayerConfig, ResolvedSource, SegmentError, SinkConnector, SinkError, SinkHandle,
    SinkTarget, SourceResolver, Transcoder, Window,
};
use tokio::sync::{Notify, broadcast};

pub const FRAME_SAMPLES: usize = 960;

pub fn config(temp_dir: &Path) -> PlayerConfig {
    PlayerConfig {
        window: Duration::from_secs(10),
        attach_backoff: Duration::from_millis(50),
        idle_detach: None,
        temp_dir: temp_dir.to_path_buf(),
        temp_prefix: "it".to_string(),
        ..PlayerConfig::default()
    }
}

/// `test://track/<marker>` URLs resolve to a fixed length.
pub struct FakeResolver {
    default_secs: u64,
    durations: HashMap<String, u64>,
}

impl FakeResolver {
    pub fn new(default_secs: u64) -> Self {
        Self {
            default_secs,
            durations: HashMap::new(),
        }
    }

    pub fn with_duration(mut self, url: &str, secs: u64) -> Self {
        self.durations.insert(url.to_string(), secs);
        self
    }
}

#[async_trait]
impl SourceResolver for FakeResolver {
    async fn resolve(&self, url: &str) -> anyhow::Result<ResolvedSource> {
        if url.contains("unresolvable") {
            anyhow::bail!("no such video");
        }
        let secs = self.durations.get(url).copied().unwrap_or(self.default_secs);
        Ok(ResolvedSource {
            url: url.to_string(),
            media_url: url.to_string(),
            title: Some(format!("title of {url}")),
            duration: Some(Duration::from_secs(secs)),
        })
    }
}

/// Writes real WAV files: left channel = global frame number, right channel = track marker.
#[derive(Default)]
pub struct FakeTranscoder {
    mono_at: Option<usize>,
    fail_at: Option<usize>,
    calls: Mutex<Vec<(String, Window)>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mono_at(mut self, window: usize) -> Self {
        self.mono_at = Some(window);
        self
    }

    pub fn failing_at(mut self, window: usize) -> Self {
        self.fail_at = Some(window);
        self
    }

    pub fn calls(&self) -> Vec<(String, Window)> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn marker(url: &str) -> i16 {
    url.rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        source: &ResolvedSource,
        window: &Window,
        dest: &Path,
    ) -> Result<(), SegmentError> {
        self.calls
            .lock()
            .unwrap()
            .push((source.url.clone(), *window));
        if self.fail_at == Some(window.index) {
            return Err(SegmentError::FetchFailed("transcoder exited with 1".to_string()));
        }

        let channels = if self.mono_at == Some(window.index) { 1 } else { 2 };
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let first = window.start.as_millis() as usize * 48;
        let frames = window.duration.as_millis() as usize * 48;
        let tag = marker(&source.media_url);

        let mut writer = hound::WavWriter::create(dest, spec)
            .map_err(|e| SegmentError::FetchFailed(e.to_string()))?;
        for i in 0..frames {
            let global = ((first + i) / FRAME_SAMPLES) as i16;
            writer.write_sample(global).unwrap();
            if channels == 2 {
                writer.write_sample(tag).unwrap();
            }
        }
        writer
            .finalize()
            .map_err(|e| SegmentError::FetchFailed(e.to_string()))?;
        Ok(())
    }
}

/// One recorded frame: (global frame number, track marker).
pub type Recorded = (i16, i16);

#[derive(Default)]
pub struct SinkLog {
    pub attaches: AtomicUsize,
    pub detaches: AtomicUsize,
    pub frames: Mutex<Vec<Recorded>>,
    pub speaking: Mutex<Vec<bool>>,
    gate_fired: Mutex<bool>,
    sends: AtomicUsize,
}

impl SinkLog {
    pub fn frames(&self) -> Vec<Recorded> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frames_for(&self, track: i16) -> Vec<i16> {
        self.frames()
            .into_iter()
            .filter(|(_, m)| *m == track)
            .map(|(n, _)| n)
            .collect()
    }
}

/// Records frames. Optionally blocks once at a frame count, or fails a send.
#[derive(Clone, Default)]
pub struct FakeSink {
    pub log: Arc<SinkLog>,
    /// Block (once) the send that would record frame number `gate_at`.
    gate_at: Option<usize>,
    pub gate: Arc<Notify>,
    fail_attaches: usize,
    /// Fail the `fail_send_at`-th send (zero based), once.
    fail_send_at: Option<usize>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated_at(mut self, frames: usize) -> Self {
        self.gate_at = Some(frames);
        self
    }

    pub fn failing_attaches(mut self, n: usize) -> Self {
        self.fail_attaches = n;
        self
    }

    pub fn failing_send_at(mut self, n: usize) -> Self {
        self.fail_send_at = Some(n);
        self
    }
}

struct FakeHandle {
    sink: FakeSink,
}

#[async_trait]
impl SinkConnector for FakeSink {
    async fn attach(&self, _target: &SinkTarget) -> Result<Box<dyn SinkHandle>, SinkError> {
        let n = self.log.attaches.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_attaches {
            return Err(SinkError::AttachFailed("voice server unavailable".to_string()));
        }
        Ok(Box::new(FakeHandle { sink: self.clone() }))
    }
}

#[async_trait]
impl SinkHandle for FakeHandle {
    async fn set_speaking(&mut self, speaking: bool) -> Result<(), SinkError> {
        self.sink.log.speaking.lock().unwrap().push(speaking);
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let log = &self.sink.log;
        let send = log.sends.fetch_add(1, Ordering::SeqCst);
        if self.sink.fail_send_at == Some(send) {
            return Err(SinkError::SendFailed("connection reset".to_string()));
        }

        let recorded = log.frames.lock().unwrap().len();
        let block = {
            let mut fired = log.gate_fired.lock().unwrap();
            let hit = !*fired && self.sink.gate_at == Some(recorded);
            if hit {
                *fired = true;
            }
            hit
        };
        if block {
            self.sink.gate.notify_one();
            std::future::pending::<()>().await;
        }

        let bytes = frame.as_bytes();
        let left = i16::from_le_bytes([bytes[0], bytes[1]]);
        let right = i16::from_le_bytes([bytes[2], bytes[3]]);
        log.frames.lock().unwrap().push((left, right));
        Ok(())
    }

    async fn detach(&mut self) {
        self.sink.log.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wait (bounded) for the first event matching `pred`, returning it.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<PlaybackEvent>,
    pred: impl Fn(&PlaybackEvent) -> bool,
) -> PlaybackEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for player event")
}

pub fn is_track_ended(event: &PlaybackEvent) -> bool {
    matches!(event, PlaybackEvent::TrackEnded { .. })
}

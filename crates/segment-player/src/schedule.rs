//! Track scheduler.
//!
//! Walks a resolved track in fixed-size windows, fetches each window ahead of playback and
//! publishes ready segments onto a bounded preload queue. Fetching suspends while the queue
//! is full; cancellation is observed while a transcode is in flight and while the queue is
//! full. A segment whose transcode already finished is opened and then dropped, so the task
//! never outlives a staged file.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use relay_types::TrackRequest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EnqueueError, SegmentError};
use crate::fetch::{Segment, SegmentFetcher};
use crate::resolve::ResolvedSource;

/// One fixed-size slice of a track, in absolute source time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub index: usize,
    pub start: Duration,
    pub duration: Duration,
}

impl Window {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Iterator over the windows covering `[start, end)`.
#[derive(Clone, Debug)]
pub struct Windows {
    next_start: Duration,
    end: Duration,
    size: Duration,
    index: usize,
}

/// Windows of `size` covering `[start, end)`; the last one is clamped to `end`.
pub fn windows(start: Duration, end: Duration, size: Duration) -> Windows {
    Windows {
        next_start: start,
        end,
        size,
        index: 0,
    }
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.size.is_zero() || self.next_start >= self.end {
            return None;
        }
        let start = self.next_start;
        let duration = self.size.min(self.end - start);
        let window = Window {
            index: self.index,
            start,
            duration,
        };
        self.index += 1;
        self.next_start = start + self.size;
        Some(window)
    }
}

/// A track request bound to its source metadata, with absolute offsets.
#[derive(Clone, Debug)]
pub struct ResolvedTrack {
    pub request: TrackRequest,
    pub source: ResolvedSource,
    pub start: Duration,
    pub end: Duration,
}

impl ResolvedTrack {
    /// Bind `request` to `source`.
    ///
    /// A requested duration of zero means "to the end of the source", which needs a known
    /// source duration. Overlong requests are clamped to the source end.
    pub fn new(request: TrackRequest, source: ResolvedSource) -> Result<Self, EnqueueError> {
        let start = Duration::from_millis(request.start_ms);
        if let Some(total) = source.duration {
            if start >= total {
                return Err(EnqueueError::InvalidRequest(format!(
                    "start offset {}ms is beyond the source length {}ms",
                    request.start_ms,
                    total.as_millis()
                )));
            }
        }

        let end = match (request.duration_ms, source.duration) {
            (0, Some(total)) => total,
            (0, None) => {
                return Err(EnqueueError::InvalidRequest(
                    "source length is unknown; a duration is required".to_string(),
                ));
            }
            (ms, total) => {
                let requested = start + Duration::from_millis(ms);
                total.map_or(requested, |total| requested.min(total))
            }
        };

        Ok(Self {
            request,
            source,
            start,
            end,
        })
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn windows(&self, size: Duration) -> Windows {
        windows(self.start, self.end, size)
    }
}

/// How a scheduler task ended.
#[derive(Debug, Default)]
pub struct SchedulerSummary {
    /// Segments fetched successfully (published or discarded).
    pub fetched: usize,
    /// The fetch failure that halted scheduling, if any.
    pub error: Option<SegmentError>,
    pub cancelled: bool,
}

/// Consumer side of one scheduler task.
///
/// Dropping the handle cancels the task.
pub struct SchedulerHandle {
    segments: mpsc::Receiver<Segment>,
    cancel: CancellationToken,
    join: Option<JoinHandle<SchedulerSummary>>,
}

/// Start preloading `track` with at most `preload` ready segments queued.
pub fn spawn_scheduler(
    track: Arc<ResolvedTrack>,
    fetcher: SegmentFetcher,
    window: Duration,
    preload: usize,
) -> SchedulerHandle {
    let (tx, rx) = mpsc::channel(preload.max(1));
    let cancel = CancellationToken::new();
    let join = tokio::spawn(run_scheduler(track, fetcher, window, tx, cancel.clone()));
    SchedulerHandle {
        segments: rx,
        cancel,
        join: Some(join),
    }
}

async fn run_scheduler(
    track: Arc<ResolvedTrack>,
    fetcher: SegmentFetcher,
    window: Duration,
    tx: mpsc::Sender<Segment>,
    cancel: CancellationToken,
) -> SchedulerSummary {
    let mut summary = SchedulerSummary::default();
    for w in track.windows(window) {
        let segment = match fetcher.fetch(&track.source, w, &cancel).await {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                summary.cancelled = true;
                break;
            }
            Err(err) => {
                tracing::error!(
                    url = %track.url(),
                    window = w.index,
                    "segment fetch failed, halting preload: {err}"
                );
                summary.error = Some(err);
                break;
            }
        };
        summary.fetched += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            }
            sent = tx.send(segment) => {
                if sent.is_err() {
                    summary.cancelled = true;
                    break;
                }
            }
        }
    }
    tracing::debug!(
        url = %track.url(),
        fetched = summary.fetched,
        cancelled = summary.cancelled,
        failed = summary.error.is_some(),
        "scheduler finished"
    );
    summary
}

impl SchedulerHandle {
    /// Next ready segment; `None` once the scheduler has finished and the queue is empty.
    pub async fn next_segment(&mut self) -> Option<Segment> {
        self.segments.recv().await
    }

    /// Wait for the task. Returns an empty summary if it was already joined.
    pub async fn join(&mut self) -> SchedulerSummary {
        let Some(join) = self.join.take() else {
            return SchedulerSummary::default();
        };
        match join.await {
            Ok(summary) => summary,
            Err(e) => SchedulerSummary {
                error: Some(SegmentError::Io(io::Error::other(format!(
                    "scheduler task failed: {e}"
                )))),
                ..SchedulerSummary::default()
            },
        }
    }

    /// Cancel the task, discard every ready segment and wait for it to stop.
    ///
    /// Returns how many ready segments were discarded.
    pub async fn abandon(&mut self) -> usize {
        self.cancel.cancel();
        self.segments.close();
        let mut dropped = 0usize;
        while let Some(segment) = self.segments.recv().await {
            tracing::debug!(window = segment.index(), "discarding preloaded segment");
            drop(segment);
            dropped += 1;
        }
        self.join().await;
        dropped
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

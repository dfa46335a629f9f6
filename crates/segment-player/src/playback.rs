//! Playback state machine.
//!
//! A single actor task owns the pending track queue, the sink and the current track's
//! scheduler and encode task. At every scheduling point it first takes any pending command
//! without blocking, then races (in priority order) the next command, enqueue requests and
//! the next frame. A frame whose sink send loses the race to a command is held and re-sent
//! on resume, so pause/resume never drops or repeats frames.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use relay_types::{PlaybackCommand, PlaybackEndReason, PlayerState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PlayerConfig;
use crate::encode::{EncodeSummary, Frame, spawn_encoder};
use crate::error::{EnqueueError, SegmentError, SinkError};
use crate::events::EventBus;
use crate::fetch::{Segment, SegmentFetcher};
use crate::schedule::{ResolvedTrack, SchedulerHandle, spawn_scheduler};
use crate::sink::SinkManager;

/// Requests delivered to the actor's inbox.
pub(crate) enum PlayerMsg {
    Enqueue {
        track: ResolvedTrack,
        reply: oneshot::Sender<Result<(), EnqueueError>>,
    },
}

/// Latest-value command channel, receiver side.
pub(crate) struct CommandInbox {
    rx: watch::Receiver<Option<PlaybackCommand>>,
    closed: bool,
}

impl CommandInbox {
    pub(crate) fn new(rx: watch::Receiver<Option<PlaybackCommand>>) -> Self {
        Self { rx, closed: false }
    }

    /// Take the pending command, if any, without waiting.
    pub(crate) fn try_take(&mut self) -> Option<PlaybackCommand> {
        if self.closed {
            return None;
        }
        match self.rx.has_changed() {
            Ok(true) => *self.rx.borrow_and_update(),
            Ok(false) => None,
            Err(_) => {
                self.closed = true;
                None
            }
        }
    }

    /// Wait for the next command. Never resolves once every sender is gone.
    pub(crate) async fn next(&mut self) -> PlaybackCommand {
        loop {
            if self.closed {
                std::future::pending::<()>().await;
            }
            match self.rx.changed().await {
                Ok(()) => {
                    let latest = *self.rx.borrow_and_update();
                    if let Some(command) = latest {
                        return command;
                    }
                }
                Err(_) => self.closed = true,
            }
        }
    }
}

/// How the current track ended.
struct TrackEnd {
    reason: PlaybackEndReason,
    error: Option<String>,
    sink_failed: bool,
}

impl TrackEnd {
    fn new(reason: PlaybackEndReason) -> Self {
        Self {
            reason,
            error: None,
            sink_failed: false,
        }
    }

    fn failed(err: SegmentError) -> Self {
        Self {
            reason: PlaybackEndReason::Error,
            error: Some(err.to_string()),
            sink_failed: false,
        }
    }

    fn sink(err: SinkError) -> Self {
        Self {
            reason: PlaybackEndReason::Error,
            error: Some(err.to_string()),
            sink_failed: true,
        }
    }
}

/// Outcome of one wait for the next frame.
enum Step {
    Frame(Frame),
    /// Something other than a frame happened; re-evaluate.
    Again,
    End(TrackEnd),
}

/// The segment whose encode task is currently feeding frames.
struct ActiveSegment {
    index: usize,
    frames: mpsc::Receiver<Frame>,
    stop: CancellationToken,
    join: JoinHandle<Result<EncodeSummary, SegmentError>>,
}

impl ActiveSegment {
    fn start(segment: Segment, config: &PlayerConfig) -> Self {
        let index = segment.index();
        let stop = CancellationToken::new();
        let (frames, join) = spawn_encoder(
            segment,
            config.codec,
            config.frame_samples,
            config.volume,
            config.frame_buffer,
            stop.clone(),
        );
        tracing::debug!(window = index, "streaming segment");
        Self {
            index,
            frames,
            stop,
            join,
        }
    }

    async fn finish(self) -> Result<EncodeSummary, SegmentError> {
        self.join
            .await
            .map_err(|e| SegmentError::Io(io::Error::other(e)))?
    }

    /// Stop the encode task and wait until it has released its segment.
    async fn stop(self) {
        let ActiveSegment {
            index,
            frames,
            stop,
            join,
        } = self;
        stop.cancel();
        drop(frames);
        match join.await {
            Ok(Ok(summary)) => {
                tracing::debug!(window = index, frames = summary.frames, "segment stopped")
            }
            Ok(Err(e)) => tracing::debug!(window = index, "stopped segment had failed: {e}"),
            Err(e) => tracing::warn!(window = index, "encode task join failed: {e}"),
        }
    }
}

/// Per-track playback position.
struct TrackRun {
    scheduler: SchedulerHandle,
    current: Option<ActiveSegment>,
    held: Option<Frame>,
    paused: bool,
    frames_sent: u64,
}

impl TrackRun {
    fn new(scheduler: SchedulerHandle) -> Self {
        Self {
            scheduler,
            current: None,
            held: None,
            paused: false,
            frames_sent: 0,
        }
    }

    async fn stop_segment(&mut self) {
        self.held = None;
        if let Some(active) = self.current.take() {
            active.stop().await;
        }
    }
}

pub(crate) struct PlaybackActor {
    config: PlayerConfig,
    fetcher: SegmentFetcher,
    sink: SinkManager,
    commands: CommandInbox,
    inbox: mpsc::Receiver<PlayerMsg>,
    inbox_open: bool,
    pending: VecDeque<ResolvedTrack>,
    events: EventBus,
    state: PlayerState,
}

impl PlaybackActor {
    pub(crate) fn new(
        config: PlayerConfig,
        fetcher: SegmentFetcher,
        sink: SinkManager,
        commands: CommandInbox,
        inbox: mpsc::Receiver<PlayerMsg>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            fetcher,
            sink,
            commands,
            inbox,
            inbox_open: true,
            pending: VecDeque::new(),
            events,
            state: PlayerState::Idle,
        }
    }

    /// Run until every handle is gone and the queue is empty.
    pub(crate) async fn run(mut self) {
        tracing::info!("player started");
        loop {
            if let Some(track) = self.pending.pop_front() {
                self.play_track(track).await;
                continue;
            }
            self.set_state(PlayerState::Idle);
            if !self.inbox_open {
                break;
            }
            self.idle().await;
        }
        self.sink.detach().await;
        tracing::info!("player stopped");
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "player state changed");
            self.state = state;
            self.events.state_changed(state);
        }
    }

    /// Wait for work with no track playing. Detaches the sink after the idle timeout.
    async fn idle(&mut self) {
        let deadline = self
            .config
            .idle_detach
            .filter(|d| !d.is_zero())
            .map(|d| Instant::now() + d);
        let idle_timer = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::pin!(idle_timer);

        while self.pending.is_empty() && self.inbox_open {
            tokio::select! {
                biased;
                command = self.commands.next() => {
                    tracing::debug!(?command, "nothing playing, command ignored");
                }
                msg = self.inbox.recv() => self.on_inbox(msg, true).await,
                () = &mut idle_timer, if deadline.is_some() && self.sink.is_attached() => {
                    tracing::info!("idle timeout reached");
                    self.sink.detach().await;
                }
            }
        }
    }

    async fn on_inbox(&mut self, msg: Option<PlayerMsg>, idle: bool) {
        match msg {
            Some(PlayerMsg::Enqueue { track, reply }) => {
                let result = self.accept(track, idle).await;
                if reply.send(result).is_err() {
                    tracing::debug!("enqueue caller went away before the reply");
                }
            }
            None => {
                tracing::debug!("player inbox closed");
                self.inbox_open = false;
            }
        }
    }

    async fn accept(&mut self, track: ResolvedTrack, idle: bool) -> Result<(), EnqueueError> {
        if self.pending.len() >= self.config.max_pending_tracks {
            tracing::warn!(url = %track.url(), pending = self.pending.len(), "queue full");
            return Err(EnqueueError::QueueFull(self.pending.len()));
        }
        if idle {
            self.sink.ensure_attached().await?;
        }
        tracing::info!(
            url = %track.url(),
            position = self.pending.len(),
            "track queued"
        );
        self.pending.push_back(track);
        Ok(())
    }

    async fn play_track(&mut self, track: ResolvedTrack) {
        let track = Arc::new(track);
        let url = track.url().to_string();
        let start_ms = track.start.as_millis() as u64;
        let end_ms = track.end.as_millis() as u64;

        self.events
            .track_started(&url, track.source.title.clone(), start_ms, end_ms);
        tracing::info!(url = %url, start_ms, end_ms, "track started");

        if let Err(e) = self.start_sink().await {
            self.sink.detach().await;
            self.set_state(PlayerState::Stopped);
            tracing::error!(url = %url, "track failed before playback: {e}");
            self.events
                .track_ended(&url, PlaybackEndReason::Error, 0, Some(e.to_string()));
            return;
        }

        let scheduler = spawn_scheduler(
            track.clone(),
            self.fetcher.clone(),
            self.config.window,
            self.config.preload_segments,
        );
        let mut run = TrackRun::new(scheduler);
        self.set_state(PlayerState::Playing);

        let end = self.stream(&mut run).await;

        if end.reason == PlaybackEndReason::Cleared {
            self.set_state(PlayerState::Draining);
        }
        run.stop_segment().await;
        let discarded = run.scheduler.abandon().await;
        if discarded > 0 {
            tracing::debug!(url = %url, discarded, "discarded preloaded segments");
        }

        if end.sink_failed {
            self.sink.detach().await;
        } else if let Err(e) = self.sink.set_speaking(false).await {
            tracing::warn!("clear speaking failed, detaching: {e}");
            self.sink.detach().await;
        }
        self.set_state(PlayerState::Stopped);

        match &end.error {
            Some(err) => tracing::error!(
                url = %url,
                frames_sent = run.frames_sent,
                "track failed: {err}"
            ),
            None => tracing::info!(
                url = %url,
                frames_sent = run.frames_sent,
                reason = ?end.reason,
                "track ended"
            ),
        }
        self.events
            .track_ended(&url, end.reason, run.frames_sent, end.error);

        if end.reason == PlaybackEndReason::Cleared {
            let dropped = self.pending.len();
            self.pending.clear();
            tracing::info!(dropped, "queue cleared");
            self.events.queue_cleared(dropped);
        }
    }

    async fn start_sink(&mut self) -> Result<(), SinkError> {
        self.sink.ensure_attached().await?;
        self.sink.set_speaking(true).await
    }

    /// Apply a command to the current track. Returns the end when it stops the track.
    fn on_command(&mut self, command: PlaybackCommand, run: &mut TrackRun) -> Option<TrackEnd> {
        tracing::debug!(?command, "command received");
        match command {
            PlaybackCommand::Pause => {
                if !run.paused {
                    run.paused = true;
                    tracing::info!(frames_sent = run.frames_sent, "paused");
                    self.set_state(PlayerState::Paused);
                }
                None
            }
            PlaybackCommand::Play => {
                if run.paused {
                    run.paused = false;
                    tracing::info!(frames_sent = run.frames_sent, "resumed");
                    self.set_state(PlayerState::Playing);
                }
                None
            }
            PlaybackCommand::Skip => Some(TrackEnd::new(PlaybackEndReason::Skipped)),
            PlaybackCommand::Clear => Some(TrackEnd::new(PlaybackEndReason::Cleared)),
        }
    }

    async fn stream(&mut self, run: &mut TrackRun) -> TrackEnd {
        loop {
            if let Some(command) = self.commands.try_take() {
                if let Some(end) = self.on_command(command, run) {
                    return end;
                }
                continue;
            }

            if run.paused {
                tokio::select! {
                    biased;
                    command = self.commands.next() => {
                        if let Some(end) = self.on_command(command, run) {
                            return end;
                        }
                    }
                    msg = self.inbox.recv(), if self.inbox_open => self.on_inbox(msg, false).await,
                }
                continue;
            }

            let frame = match run.held.take() {
                Some(frame) => frame,
                None => match self.next_frame(run).await {
                    Step::Frame(frame) => frame,
                    Step::Again => continue,
                    Step::End(end) => return end,
                },
            };

            tokio::select! {
                biased;
                command = self.commands.next() => {
                    run.held = Some(frame);
                    if let Some(end) = self.on_command(command, run) {
                        return end;
                    }
                }
                msg = self.inbox.recv(), if self.inbox_open => {
                    run.held = Some(frame);
                    self.on_inbox(msg, false).await;
                }
                sent = self.sink.send(&frame) => match sent {
                    Ok(()) => run.frames_sent += 1,
                    Err(e) => return TrackEnd::sink(e),
                },
            }
        }
    }

    async fn next_frame(&mut self, run: &mut TrackRun) -> Step {
        if let Some(active) = run.current.as_mut() {
            return tokio::select! {
                biased;
                command = self.commands.next() => match self.on_command(command, run) {
                    Some(end) => Step::End(end),
                    None => Step::Again,
                },
                msg = self.inbox.recv(), if self.inbox_open => {
                    self.on_inbox(msg, false).await;
                    Step::Again
                }
                frame = active.frames.recv() => match frame {
                    Some(frame) => Step::Frame(frame),
                    None => {
                        let Some(done) = run.current.take() else {
                            return Step::Again;
                        };
                        match done.finish().await {
                            Ok(summary) => {
                                tracing::debug!(
                                    window = summary.segment,
                                    frames = summary.frames,
                                    "segment finished"
                                );
                                Step::Again
                            }
                            Err(e) => Step::End(TrackEnd::failed(e)),
                        }
                    }
                },
            };
        }

        tokio::select! {
            biased;
            command = self.commands.next() => match self.on_command(command, run) {
                Some(end) => Step::End(end),
                None => Step::Again,
            },
            msg = self.inbox.recv(), if self.inbox_open => {
                self.on_inbox(msg, false).await;
                Step::Again
            }
            segment = run.scheduler.next_segment() => match segment {
                Some(segment) => {
                    run.current = Some(ActiveSegment::start(segment, &self.config));
                    Step::Again
                }
                None => match run.scheduler.join().await.error {
                    Some(e) => Step::End(TrackEnd::failed(e)),
                    None => Step::End(TrackEnd::new(PlaybackEndReason::Eof)),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_inbox_keeps_latest_only() {
        let (tx, rx) = watch::channel(None);
        let mut inbox = CommandInbox::new(rx);
        assert_eq!(inbox.try_take(), None);

        tx.send_replace(Some(PlaybackCommand::Pause));
        tx.send_replace(Some(PlaybackCommand::Skip));
        assert_eq!(inbox.try_take(), Some(PlaybackCommand::Skip));
        assert_eq!(inbox.try_take(), None);
    }

    #[tokio::test]
    async fn command_inbox_repeats_same_command() {
        let (tx, rx) = watch::channel(None);
        let mut inbox = CommandInbox::new(rx);
        tx.send_replace(Some(PlaybackCommand::Pause));
        assert_eq!(inbox.next().await, PlaybackCommand::Pause);
        tx.send_replace(Some(PlaybackCommand::Pause));
        assert_eq!(inbox.next().await, PlaybackCommand::Pause);
    }

    #[tokio::test]
    async fn command_inbox_pends_after_close() {
        let (tx, rx) = watch::channel(None);
        let mut inbox = CommandInbox::new(rx);
        drop(tx);
        assert_eq!(inbox.try_take(), None);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), inbox.next()).await;
        assert!(waited.is_err());
    }
}

//! Public player handle.

use std::sync::Arc;

use relay_types::{PlaybackCommand, PlaybackEvent, TrackRequest};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{PlayerConfig, SinkTarget};
use crate::error::{ConfigError, EnqueueError};
use crate::events::EventBus;
use crate::fetch::SegmentFetcher;
use crate::playback::{CommandInbox, PlaybackActor, PlayerMsg};
use crate::resolve::SourceResolver;
use crate::schedule::ResolvedTrack;
use crate::sink::{SinkConnector, SinkManager};
use crate::staging::{StagingArea, StagingStats};
use crate::transcode::Transcoder;

const INBOX_CAPACITY: usize = 16;

/// Handle to a running player task.
///
/// Dropping every handle lets the player finish its queue and stop.
pub struct Player {
    inbox: mpsc::Sender<PlayerMsg>,
    commands: watch::Sender<Option<PlaybackCommand>>,
    events: EventBus,
    resolver: Arc<dyn SourceResolver>,
    staging: StagingArea,
    task: JoinHandle<()>,
}

impl Player {
    /// Validate `config` and start the player task on the current runtime.
    pub fn spawn(
        config: PlayerConfig,
        target: SinkTarget,
        resolver: Arc<dyn SourceResolver>,
        transcoder: Arc<dyn Transcoder>,
        connector: Arc<dyn SinkConnector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let staging = StagingArea::new(&config.temp_dir, &config.temp_prefix).map_err(|source| {
            ConfigError::TempDir {
                path: config.temp_dir.clone(),
                source,
            }
        })?;

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (commands_tx, commands_rx) = watch::channel(None);
        let events = EventBus::default();

        let fetcher = SegmentFetcher::new(transcoder, staging.clone());
        let sink = SinkManager::new(connector, target, config.attach_backoff);
        let actor = PlaybackActor::new(
            config,
            fetcher,
            sink,
            CommandInbox::new(commands_rx),
            inbox_rx,
            events.clone(),
        );
        let task = tokio::spawn(actor.run());

        Ok(Self {
            inbox: inbox_tx,
            commands: commands_tx,
            events,
            resolver,
            staging,
            task,
        })
    }

    /// Resolve `request` and append it to the queue.
    ///
    /// When nothing is playing this also attaches the sink, so attach failures surface here.
    pub async fn enqueue(&self, request: TrackRequest) -> Result<(), EnqueueError> {
        if request.url.trim().is_empty() {
            return Err(EnqueueError::InvalidRequest("empty url".to_string()));
        }
        let source = self
            .resolver
            .resolve(&request.url)
            .await
            .map_err(|e| EnqueueError::Resolve(format!("{e:#}")))?;
        let track = ResolvedTrack::new(request, source)?;

        let (reply, response) = oneshot::channel();
        self.inbox
            .send(PlayerMsg::Enqueue { track, reply })
            .await
            .map_err(|_| EnqueueError::Closed)?;
        response.await.map_err(|_| EnqueueError::Closed)?
    }

    /// Deliver a control command. Replaces any command not yet observed.
    pub fn send(&self, command: PlaybackCommand) {
        self.commands.send_replace(Some(command));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn staging_stats(&self) -> StagingStats {
        self.staging.stats()
    }

    /// Stop accepting tracks, let the queued ones play out, then detach and wait for the
    /// player task to exit.
    pub async fn finish(self) {
        let Player {
            inbox,
            commands,
            task,
            ..
        } = self;
        drop(inbox);
        if let Err(e) = task.await {
            tracing::warn!("player task join failed: {e}");
        }
        drop(commands);
    }

    /// Clear everything, detach the sink and wait for the player task to exit.
    pub async fn shutdown(self) {
        let Player {
            inbox,
            commands,
            task,
            ..
        } = self;
        commands.send_replace(Some(PlaybackCommand::Clear));
        drop(inbox);
        if let Err(e) = task.await {
            tracing::warn!("player task join failed: {e}");
        }
        drop(commands);
    }
}

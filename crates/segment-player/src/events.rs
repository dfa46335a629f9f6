//! In-process event bus for player lifecycle updates.

use relay_types::{PlaybackEndReason, PlaybackEvent, PlayerState};
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.sender.subscribe()
    }

    pub fn track_started(&self, url: &str, title: Option<String>, start_ms: u64, end_ms: u64) {
        let _ = self.sender.send(PlaybackEvent::TrackStarted {
            url: url.to_string(),
            title,
            start_ms,
            end_ms,
        });
    }

    pub fn state_changed(&self, state: PlayerState) {
        let _ = self.sender.send(PlaybackEvent::StateChanged { state });
    }

    pub fn track_ended(
        &self,
        url: &str,
        reason: PlaybackEndReason,
        frames_sent: u64,
        error: Option<String>,
    ) {
        let _ = self.sender.send(PlaybackEvent::TrackEnded {
            url: url.to_string(),
            reason,
            frames_sent,
            error,
        });
    }

    pub fn queue_cleared(&self, dropped: usize) {
        let _ = self.sender.send(PlaybackEvent::QueueCleared { dropped });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.state_changed(PlayerState::Playing);
        bus.queue_cleared(2);

        assert_eq!(
            rx.recv().await.unwrap(),
            PlaybackEvent::StateChanged {
                state: PlayerState::Playing
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            PlaybackEvent::QueueCleared { dropped: 2 }
        );
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(1);
        bus.track_ended("u", PlaybackEndReason::Eof, 0, None);
    }
}

//! Output sink seam and attachment lifecycle.
//!
//! The transport itself (a voice connection, a file, a test recorder) lives behind
//! [`SinkConnector`] / [`SinkHandle`]. [`SinkManager`] owns at most one live handle,
//! keeps it across track boundaries and tracks the speaking flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SinkTarget;
use crate::encode::Frame;
use crate::error::SinkError;

/// Opens a transport session for a target.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn attach(&self, target: &SinkTarget) -> Result<Box<dyn SinkHandle>, SinkError>;
}

/// One attached transport session.
#[async_trait]
pub trait SinkHandle: Send {
    async fn set_speaking(&mut self, speaking: bool) -> Result<(), SinkError>;

    /// Deliver one frame. Dropping the returned future means the frame was not accepted.
    async fn send(&mut self, frame: &Frame) -> Result<(), SinkError>;

    async fn detach(&mut self);
}

pub struct SinkManager {
    connector: Arc<dyn SinkConnector>,
    target: SinkTarget,
    backoff: Duration,
    handle: Option<Box<dyn SinkHandle>>,
    speaking: bool,
}

impl SinkManager {
    pub fn new(connector: Arc<dyn SinkConnector>, target: SinkTarget, backoff: Duration) -> Self {
        Self {
            connector,
            target,
            backoff,
            handle: None,
            speaking: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Attach if not attached. A failed attach is retried once after the backoff.
    pub async fn ensure_attached(&mut self) -> Result<(), SinkError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let handle = match self.connector.attach(&self.target).await {
            Ok(handle) => handle,
            Err(first) => {
                tracing::warn!(
                    group_id = self.target.group_id,
                    channel_id = self.target.channel_id,
                    "sink attach failed, retrying in {:?}: {first}",
                    self.backoff
                );
                tokio::time::sleep(self.backoff).await;
                self.connector.attach(&self.target).await.inspect_err(|e| {
                    tracing::error!(
                        group_id = self.target.group_id,
                        channel_id = self.target.channel_id,
                        "sink attach retry failed: {e}"
                    );
                })?
            }
        };
        tracing::info!(
            group_id = self.target.group_id,
            channel_id = self.target.channel_id,
            "sink attached"
        );
        self.handle = Some(handle);
        self.speaking = false;
        Ok(())
    }

    /// Forward a speaking change; repeated values are not re-sent.
    pub async fn set_speaking(&mut self, speaking: bool) -> Result<(), SinkError> {
        if self.speaking == speaking {
            return Ok(());
        }
        let Some(handle) = self.handle.as_mut() else {
            self.speaking = false;
            return if speaking {
                Err(SinkError::SendFailed("sink not attached".to_string()))
            } else {
                Ok(())
            };
        };
        handle.set_speaking(speaking).await?;
        self.speaking = speaking;
        Ok(())
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), SinkError> {
        match self.handle.as_mut() {
            Some(handle) => handle.send(frame).await,
            None => Err(SinkError::SendFailed("sink not attached".to_string())),
        }
    }

    /// Clear speaking and drop the session. No-op when not attached.
    pub async fn detach(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        if self.speaking {
            if let Err(e) = handle.set_speaking(false).await {
                tracing::warn!("clear speaking before detach failed: {e}");
            }
        }
        self.speaking = false;
        handle.detach().await;
        tracing::info!(
            group_id = self.target.group_id,
            channel_id = self.target.channel_id,
            "sink detached"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Log {
        attaches: AtomicUsize,
        speaking: Mutex<Vec<bool>>,
        frames: AtomicUsize,
        detaches: AtomicUsize,
    }

    struct MockConnector {
        fail_attaches: usize,
        log: Arc<Log>,
    }

    struct MockHandle {
        log: Arc<Log>,
    }

    #[async_trait]
    impl SinkConnector for MockConnector {
        async fn attach(&self, _target: &SinkTarget) -> Result<Box<dyn SinkHandle>, SinkError> {
            let n = self.log.attaches.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_attaches {
                return Err(SinkError::AttachFailed("busy".to_string()));
            }
            Ok(Box::new(MockHandle {
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl SinkHandle for MockHandle {
        async fn set_speaking(&mut self, speaking: bool) -> Result<(), SinkError> {
            self.log.speaking.lock().unwrap().push(speaking);
            Ok(())
        }

        async fn send(&mut self, _frame: &Frame) -> Result<(), SinkError> {
            self.log.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn detach(&mut self) {
            self.log.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(fail_attaches: usize) -> (SinkManager, Arc<Log>) {
        let log = Arc::new(Log::default());
        let connector = Arc::new(MockConnector {
            fail_attaches,
            log: log.clone(),
        });
        (
            SinkManager::new(connector, SinkTarget::default(), Duration::from_secs(1)),
            log,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn attach_retries_once_after_backoff() {
        let (mut sink, log) = manager(1);
        let started = tokio::time::Instant::now();
        sink.ensure_attached().await.unwrap();
        assert!(sink.is_attached());
        assert_eq!(log.attaches.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn attach_gives_up_after_second_failure() {
        let (mut sink, log) = manager(5);
        let err = sink.ensure_attached().await.unwrap_err();
        assert!(matches!(err, SinkError::AttachFailed(_)));
        assert_eq!(log.attaches.load(Ordering::SeqCst), 2);
        assert!(!sink.is_attached());
    }

    #[tokio::test]
    async fn attach_is_reused() {
        let (mut sink, log) = manager(0);
        sink.ensure_attached().await.unwrap();
        sink.ensure_attached().await.unwrap();
        assert_eq!(log.attaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn speaking_changes_only_are_forwarded() {
        let (mut sink, log) = manager(0);
        sink.ensure_attached().await.unwrap();
        sink.set_speaking(true).await.unwrap();
        sink.set_speaking(true).await.unwrap();
        sink.set_speaking(false).await.unwrap();
        assert_eq!(*log.speaking.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn detach_clears_speaking() {
        let (mut sink, log) = manager(0);
        sink.ensure_attached().await.unwrap();
        sink.set_speaking(true).await.unwrap();
        sink.detach().await;
        sink.detach().await;
        assert!(!sink.is_attached());
        assert!(!sink.is_speaking());
        assert_eq!(*log.speaking.lock().unwrap(), vec![true, false]);
        assert_eq!(log.detaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_without_attach_fails() {
        let (mut sink, log) = manager(0);
        let err = sink.send(&Frame::new(vec![0; 4])).await.unwrap_err();
        assert!(matches!(err, SinkError::SendFailed(_)));
        assert_eq!(log.frames.load(Ordering::SeqCst), 0);
    }
}

//! Recovery strategies and the generic fallbacks
//!
//! Strategies are registered by error kind ahead of time and looked up at
//! capture. When no strategy matches, or a strategy fails, the handler
//! falls back to generic recoveries keyed by message content: wait for
//! connectivity on network errors, run the clear-caches hook on memory
//! errors, and broadcast a recovery event for component-scoped render
//! errors.

use crate::classify::ErrorReport;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("recovery failed: {0}")]
    Failed(String),

    #[error("no strategy registered for '{0}'")]
    NoStrategy(String),

    #[error("timed out waiting for connectivity")]
    StillOffline,
}

/// An idempotent recovery routine, registered per error kind
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    async fn recover(&self, report: &ErrorReport) -> Result<(), RecoveryError>;
}

/// Broadcast to component owners when a component-scoped error recovers
/// through the generic render fallback
#[derive(Debug, Clone)]
pub struct RecoveryEvent {
    pub component: String,
    pub kind: String,
}

/// Shared connectivity state plus the recovery broadcast channel.
///
/// `set_online` is fed by whatever connectivity signal the host process
/// has; the network fallback waits on it.
pub struct RecoveryChannels {
    online_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<RecoveryEvent>,
}

impl RecoveryChannels {
    pub fn new() -> Self {
        let (online_tx, _) = watch::channel(true);
        let (events_tx, _) = broadcast::channel(32);
        Self { online_tx, events_tx }
    }

    pub fn set_online(&self, online: bool) {
        let _ = self.online_tx.send(online);
    }

    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn broadcast(&self, event: RecoveryEvent) {
        // No subscribers is fine, the event is advisory
        let _ = self.events_tx.send(event);
    }

    /// Wait until connectivity returns, bounded by `deadline`
    pub(crate) async fn wait_for_online(&self, deadline: Duration) -> Result<(), RecoveryError> {
        let mut rx = self.online_tx.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| RecoveryError::StillOffline)
    }
}

impl Default for RecoveryChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_online_returns_immediately_when_online() {
        let channels = RecoveryChannels::new();
        channels
            .wait_for_online(Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_online_times_out_when_offline() {
        let channels = RecoveryChannels::new();
        channels.set_online(false);
        let err = channels
            .wait_for_online(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::StillOffline));
    }

    #[tokio::test]
    async fn test_wait_for_online_wakes_on_reconnect() {
        let channels = std::sync::Arc::new(RecoveryChannels::new());
        channels.set_online(false);

        let waiter = {
            let channels = channels.clone();
            tokio::spawn(async move { channels.wait_for_online(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        channels.set_online(true);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let channels = RecoveryChannels::new();
        let mut rx = channels.subscribe_events();
        channels.broadcast(RecoveryEvent {
            component: "chat_panel".to_string(),
            kind: "render".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.component, "chat_panel");
    }
}

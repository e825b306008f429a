//! Connectivity signal.
//!
//! The queue drains on the offline-to-online transition. The signal's
//! source is external: browser network events feed [`Connectivity`]
//! directly, or [`spawn_probe`] polls the backend health endpoint for
//! hosts without native events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::ProgressApi;

/// Shared online/offline flag with change notification.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Create the signal with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a state change. No-op (no notification) if unchanged.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Periodically ping the backend and publish the result.
pub fn spawn_probe(
    connectivity: Connectivity,
    api: Arc<dyn ProgressApi>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let online = api.ping().await;
            connectivity.set_online(online);
            tokio::time::sleep(interval).await;
        }
    })
}

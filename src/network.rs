//! Connectivity signal for the offline core.
//!
//! The platform layer reports connectivity changes into [`NetworkMonitor`];
//! the sync loop and manual affordances read the current value and await
//! offline→online edges. The monitor keeps no state beyond the last known
//! connectivity value.

use tokio::sync::watch;
use tracing::info;

/// Last-known connectivity plus change notification.
///
/// Subscribers get a `watch::Receiver<bool>` that is only notified when the
/// value actually changes, so repeated online "pings" do not produce spurious
/// edges — each offline→online transition is observed exactly once.
pub struct NetworkMonitor {
    online: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Create a monitor with an initial connectivity value.
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online }
    }

    /// Current connectivity as last reported by the platform.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Report a connectivity change from the platform layer.
    ///
    /// Idempotent: reporting the same value again notifies nobody.
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            if online {
                info!("network restored; resuming queued sync");
            } else {
                info!("network offline; deferring sync and keeping queue pending");
            }
            *current = online;
            true
        });
    }

    /// Subscribe to connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

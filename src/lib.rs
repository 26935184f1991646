//! Pavilion Offline Core
//!
//! Offline-first order pipeline and tiered cache for the Pavilion events
//! app. The crate has no process entry point of its own — the UI layer
//! constructs an [`OfflineCore`] around three platform collaborators (a
//! durable key-value store, an order-submission endpoint, and a network
//! fetch) and reports connectivity changes into the [`NetworkMonitor`].
//!
//! The pipeline: the UI mutates the [`CartStore`], checkout snapshots the
//! cart into an immutable order via the [`OrderOutbox`], failed or offline
//! submissions are queued durably and drained on reconnect, and the
//! [`CacheManager`] independently serves menu/API data and images through
//! per-tier read strategies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

mod cache;
mod cart;
mod error;
mod network;
mod store;
mod sync;

pub use cache::{
    CacheConfig, CacheEntry, CacheManager, Fetcher, ReadStrategy, TierConfig, TierKind, TierStats,
};
pub use cart::{Cart, CartItem, CartStore, Customization};
pub use error::{CoreError, CoreResult};
pub use network::NetworkMonitor;
pub use store::{DurableStore, MemoryStore, KEY_CART, KEY_CACHE_PREFIX, KEY_PENDING_ORDERS};
pub use sync::{
    estimate_minutes, Order, OrderOutbox, OrderStatus, OrderSubmitter, PendingOrder, MAX_RETRIES,
};

/// Install a per-process test subscriber so `RUST_LOG` works in test runs.
/// The library itself never installs one; that is the embedder's job.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default bound on order submissions and cache fetches. A stalled request
/// is treated as a network failure rather than blocking the UX.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level configuration for [`OfflineCore`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub request_timeout: Duration,
    pub cache: CacheConfig,
    /// Connectivity assumed until the platform reports otherwise.
    pub initially_online: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache: CacheConfig::default(),
            initially_online: true,
        }
    }
}

/// The assembled offline core: cart, outbox, cache, and connectivity glue
/// behind one explicit init/shutdown lifecycle. No global state — multiple
/// independent instances can coexist (one per test, one per embedder).
pub struct OfflineCore {
    network: Arc<NetworkMonitor>,
    cart: Arc<CartStore>,
    outbox: Arc<OrderOutbox>,
    cache: Arc<CacheManager>,
    loop_running: Arc<AtomicBool>,
    last_sync: Arc<Mutex<Option<DateTime<Utc>>>>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OfflineCore {
    /// Assemble the core around the three platform collaborators, restoring
    /// all persisted state (cart, pending orders, cache tiers) from `store`.
    pub fn new(
        store: Arc<dyn DurableStore>,
        submitter: Arc<dyn OrderSubmitter>,
        fetcher: Arc<dyn Fetcher>,
        config: CoreConfig,
    ) -> Self {
        let network = Arc::new(NetworkMonitor::new(config.initially_online));
        let cart = Arc::new(CartStore::new(store.clone()));
        let outbox = Arc::new(OrderOutbox::new(
            store.clone(),
            submitter,
            network.clone(),
            cart.clone(),
            config.request_timeout,
        ));
        let cache = Arc::new(CacheManager::new(
            store,
            fetcher,
            config.cache,
            config.request_timeout,
        ));
        Self {
            network,
            cart,
            outbox,
            cache,
            loop_running: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(Mutex::new(None)),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn cart(&self) -> &CartStore {
        &self.cart
    }

    pub fn outbox(&self) -> &OrderOutbox {
        &self.outbox
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Completion time of the last successful sync pass, if any.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().expect("last_sync lock poisoned")
    }

    /// Start the background sync loop: awaits connectivity edges and drains
    /// the outbox on every offline→online transition. Idempotent — a second
    /// call while running is a no-op. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) {
        if self
            .loop_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let running = self.loop_running.clone();
        let outbox = self.outbox.clone();
        let last_sync = self.last_sync.clone();
        let mut connectivity = self.network.subscribe();

        let handle = tokio::spawn(async move {
            info!("sync loop started");
            loop {
                if connectivity.changed().await.is_err() {
                    break;
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let online = *connectivity.borrow_and_update();
                if !online {
                    continue;
                }
                // The monitor only notifies on actual changes, so this is
                // one offline→online edge: drain the queue once.
                match outbox.sync().await {
                    Ok(synced) => {
                        if let Ok(mut guard) = last_sync.lock() {
                            *guard = Some(Utc::now());
                        }
                        if synced > 0 {
                            info!("reconnect sync complete: {synced} orders synced");
                        }
                    }
                    Err(e) => warn!("reconnect sync failed: {e}"),
                }
            }
            info!("sync loop stopped");
        });

        *self.loop_handle.lock().expect("loop handle lock poisoned") = Some(handle);
    }

    /// Stop the background sync loop. In-flight submission attempts are
    /// abandoned; queued entries stay durable and sync on the next start.
    pub fn shutdown(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .loop_handle
            .lock()
            .expect("loop handle lock poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for OfflineCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

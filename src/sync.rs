//! Order creation and the offline outbox.
//!
//! Checkout snapshots the cart into an immutable [`Order`] and tries to
//! submit it. While offline, or when submission fails, the order is queued
//! durably as a [`PendingOrder`] and retried by [`OrderOutbox::sync`], which
//! the background loop drives on every offline→online transition. Entries
//! are retried at most [`MAX_RETRIES`] times; synced entries are garbage
//! collected once older than the retention window. Delivery is at-least-once
//! with a bounded retry budget, never exactly-once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cart::{Cart, CartItem, CartStore};
use crate::error::{CoreError, CoreResult};
use crate::network::NetworkMonitor;
use crate::store::{DurableStore, KEY_PENDING_ORDERS};

/// Automatic submission attempts per queued order. After the budget is spent
/// the entry stays visible but is excluded from further automatic syncs.
pub const MAX_RETRIES: u32 = 3;
/// Synced entries are kept this long for UI history, then garbage collected.
const SYNCED_RETENTION_HOURS: i64 = 24;
/// Pickup estimate: base preparation time plus a per-item increment.
const ESTIMATE_BASE_MINUTES: u32 = 15;
const ESTIMATE_PER_ITEM_MINUTES: u32 = 3;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Submitted to the order endpoint (or about to be).
    Pending,
    /// Created while offline and waiting in the outbox.
    Queued,
}

/// Immutable order snapshot. Created once from the cart at checkout and
/// never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub session_id: String,
    pub items: Vec<CartItem>,
    pub total: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub estimated_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Order {
    fn from_cart(cart: &Cart, status: OrderStatus, notes: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: cart.session_id.clone(),
            items: cart.items.clone(),
            total: cart.total,
            status,
            created_at: Utc::now(),
            estimated_minutes: estimate_minutes(cart.item_count),
            notes,
        }
    }
}

/// Ready-time estimate in minutes for a given item count.
pub fn estimate_minutes(item_count: u32) -> u32 {
    ESTIMATE_BASE_MINUTES + ESTIMATE_PER_ITEM_MINUTES * item_count
}

/// One outbox entry: the full cart snapshot behind an order that has not
/// confirmed delivery yet. Mutated only by the sync routine (flag flip or
/// retry increment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: String,
    pub cart: Cart,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
    pub retry_count: u32,
}

impl PendingOrder {
    fn new(order_id: &str, cart: Cart) -> Self {
        Self {
            id: order_id.to_string(),
            cart,
            timestamp: Utc::now(),
            synced: false,
            retry_count: 0,
        }
    }

    /// Rebuild the submission payload for a retry. Identity and creation
    /// time come from the entry so retries submit the same order.
    fn to_order(&self) -> Order {
        Order {
            id: self.id.clone(),
            session_id: self.cart.session_id.clone(),
            items: self.cart.items.clone(),
            total: self.cart.total,
            status: OrderStatus::Queued,
            created_at: self.timestamp,
            estimated_minutes: estimate_minutes(self.cart.item_count),
            notes: None,
        }
    }

    fn retry_eligible(&self) -> bool {
        !self.synced && self.retry_count < MAX_RETRIES
    }
}

// ---------------------------------------------------------------------------
// Submission collaborator
// ---------------------------------------------------------------------------

/// Order-submission endpoint contract. Transport, auth, and payload shape
/// beyond the [`Order`] itself are the embedder's concern.
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit(&self, order: &Order) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Turns carts into orders and owns the durable retry queue under the
/// `pending-orders` key.
pub struct OrderOutbox {
    store: Arc<dyn DurableStore>,
    submitter: Arc<dyn OrderSubmitter>,
    network: Arc<NetworkMonitor>,
    cart: Arc<CartStore>,
    queue: Mutex<Vec<PendingOrder>>,
    sync_in_flight: AtomicBool,
    request_timeout: Duration,
}

impl OrderOutbox {
    /// Restore the queue from the durable store (unreadable state is logged
    /// and dropped, matching the cart's recovery behavior).
    pub fn new(
        store: Arc<dyn DurableStore>,
        submitter: Arc<dyn OrderSubmitter>,
        network: Arc<NetworkMonitor>,
        cart: Arc<CartStore>,
        request_timeout: Duration,
    ) -> Self {
        let queue = match store.get(KEY_PENDING_ORDERS) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<PendingOrder>>(&bytes) {
                Ok(queue) => {
                    if !queue.is_empty() {
                        info!(entries = queue.len(), "restored pending order queue");
                    }
                    queue
                }
                Err(e) => {
                    warn!("pending order queue unreadable, starting empty: {e}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("pending order queue load failed, starting empty: {e}");
                Vec::new()
            }
        };
        Self {
            store,
            submitter,
            network,
            cart,
            queue: Mutex::new(queue),
            sync_in_flight: AtomicBool::new(false),
            request_timeout,
        }
    }

    /// Snapshot of the outbox, newest last. Abandoned entries
    /// (`retry_count == MAX_RETRIES`, unsynced) are included so the UI can
    /// surface them for manual retry.
    pub fn pending(&self) -> Vec<PendingOrder> {
        self.queue.lock().expect("outbox lock poisoned").clone()
    }

    /// Create an order from the current cart.
    ///
    /// Empty cart → [`CoreError::EmptyCart`] with the cart untouched. In
    /// every other outcome the cart is cleared (new session id):
    /// - online + submission ok → the order is returned as submitted;
    /// - online + submission failed → the pre-submission snapshot is queued
    ///   for background retry and the error is re-raised, so the caller sees
    ///   the immediate failure even though the order will eventually sync;
    /// - offline → submission is skipped, the order is queued and returned
    ///   as a local soft-success.
    pub async fn create_order(&self, notes: Option<String>) -> CoreResult<Order> {
        let snapshot = self.cart.cart();
        if snapshot.is_empty() {
            return Err(CoreError::EmptyCart);
        }

        if !self.network.is_online() {
            let order = Order::from_cart(&snapshot, OrderStatus::Queued, notes);
            self.enqueue(PendingOrder::new(&order.id, snapshot));
            self.cart.clear();
            info!(order_id = %order.id, "offline order queued locally");
            return Ok(order);
        }

        let order = Order::from_cart(&snapshot, OrderStatus::Pending, notes);
        match self.submit_with_timeout(&order).await {
            Ok(()) => {
                self.cart.clear();
                info!(order_id = %order.id, total = order.total, "order submitted");
                Ok(order)
            }
            Err(e) => {
                self.enqueue(PendingOrder::new(&order.id, snapshot));
                self.cart.clear();
                warn!(order_id = %order.id, "order submission failed, queued for retry: {e}");
                Err(e)
            }
        }
    }

    /// Drain the outbox: submit every retry-eligible entry, then garbage
    /// collect synced entries past the retention window. Returns the number
    /// of entries that synced this pass.
    ///
    /// No-op while offline or when another sync is already in flight (a
    /// reconnect event racing a manual retry button must not double-submit
    /// the same entry).
    pub async fn sync(&self) -> CoreResult<usize> {
        if !self.network.is_online() {
            return Ok(0);
        }
        if self
            .sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in flight, skipping");
            return Ok(0);
        }
        let _guard = InFlightGuard(&self.sync_in_flight);

        let eligible: Vec<PendingOrder> = {
            let queue = self.queue.lock().expect("outbox lock poisoned");
            queue
                .iter()
                .filter(|p| p.retry_eligible())
                .cloned()
                .collect()
        };

        let synced_count = if eligible.is_empty() {
            0
        } else {
            // Settle-all: every attempt runs to completion independently;
            // one failure never cancels or delays the others.
            let attempts = eligible.iter().map(|entry| async {
                let order = entry.to_order();
                (entry.id.clone(), self.submit_with_timeout(&order).await)
            });
            let results = join_all(attempts).await;

            let mut queue = self.queue.lock().expect("outbox lock poisoned");
            let mut synced_count = 0;
            for (id, result) in results {
                let Some(entry) = queue.iter_mut().find(|p| p.id == id) else {
                    continue;
                };
                match result {
                    Ok(()) => {
                        entry.synced = true;
                        synced_count += 1;
                        info!(order_id = %id, "queued order synced");
                    }
                    Err(e) => {
                        entry.retry_count += 1;
                        if entry.retry_count >= MAX_RETRIES {
                            warn!(
                                order_id = %id,
                                retries = entry.retry_count,
                                "queued order abandoned after retry budget: {e}"
                            );
                        } else {
                            warn!(
                                order_id = %id,
                                retries = entry.retry_count,
                                "queued order sync failed: {e}"
                            );
                        }
                    }
                }
            }
            synced_count
        };

        self.collect_garbage();

        if synced_count > 0 {
            info!("sync pass complete: {synced_count} orders synced");
        }
        Ok(synced_count)
    }

    /// Drop synced entries older than the retention window and persist the
    /// surviving queue.
    fn collect_garbage(&self) {
        let cutoff = Utc::now() - ChronoDuration::hours(SYNCED_RETENTION_HOURS);
        let mut queue = self.queue.lock().expect("outbox lock poisoned");
        let before = queue.len();
        queue.retain(|p| !(p.synced && p.timestamp < cutoff));
        let dropped = before - queue.len();
        if dropped > 0 {
            debug!(dropped, "garbage collected synced orders");
        }
        self.persist(&queue);
    }

    fn enqueue(&self, pending: PendingOrder) {
        let mut queue = self.queue.lock().expect("outbox lock poisoned");
        queue.push(pending);
        self.persist(&queue);
    }

    fn persist(&self, queue: &[PendingOrder]) {
        let bytes = match serde_json::to_vec(queue) {
            Ok(b) => b,
            Err(e) => {
                warn!("pending order queue serialize failed, skipping persist: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(KEY_PENDING_ORDERS, &bytes) {
            warn!("pending order queue persist failed: {e}");
        }
    }

    /// One bounded submission attempt. A stalled request must not block the
    /// offline-first UX, so a timeout is treated as a network failure.
    async fn submit_with_timeout(&self, order: &Order) -> CoreResult<()> {
        match tokio::time::timeout(self.request_timeout, self.submitter.submit(order)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Network(format!(
                "order submission timed out after {:?}",
                self.request_timeout
            ))),
        }
    }
}

/// Clears the in-flight flag on every exit path of `sync()`.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

//! Cart state and mutation model.
//!
//! The cart is the only mutable pre-order state in the core. Every mutation
//! is a single atomic read-modify-write under the cart lock that ends in one
//! recompute-then-persist step — no other code path writes `total` or
//! `item_count`, so the denormalized fields can never be observed stale.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{DurableStore, KEY_CART};

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// A selectable add-on for a cart line (e.g. "extra shot", "oat milk").
/// Only selected customizations contribute to the line price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customization {
    pub label: String,
    pub price: f64,
    pub selected: bool,
}

/// One line of the cart. Owned exclusively by the cart that contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customizations: Vec<Customization>,
}

impl CartItem {
    /// New single-quantity line with no notes or customizations.
    pub fn new(item_id: impl Into<String>, name: impl Into<String>, unit_price: f64) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            unit_price,
            quantity: 1,
            notes: None,
            customizations: Vec::new(),
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_customizations(mut self, customizations: Vec<Customization>) -> Self {
        self.customizations = customizations;
        self
    }

    /// Effective price of one unit: base price plus all selected add-ons.
    pub fn effective_unit_price(&self) -> f64 {
        let addons: f64 = self
            .customizations
            .iter()
            .filter(|c| c.selected)
            .map(|c| c.price)
            .sum();
        self.unit_price + addons
    }

    /// Line subtotal (effective unit price × quantity).
    pub fn subtotal(&self) -> f64 {
        self.effective_unit_price() * f64::from(self.quantity)
    }
}

/// Insertion-ordered cart with denormalized totals and a session id that is
/// stable for the cart's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total: f64,
    pub item_count: u32,
    pub last_updated: DateTime<Utc>,
    pub session_id: String,
}

impl Cart {
    /// Fresh empty cart with a newly generated session id.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            total: 0.0,
            item_count: 0,
            last_updated: Utc::now(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Recompute `total` and `item_count` from the lines and refresh
    /// `last_updated`. The single invariant-preservation point.
    fn recompute(&mut self) {
        self.item_count = self.items.iter().map(|i| i.quantity).sum();
        self.total = self.items.iter().map(CartItem::subtotal).sum();
        self.last_updated = Utc::now();
    }
}

impl Default for Cart {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Cart store
// ---------------------------------------------------------------------------

/// Owner of the mutable cart. All mutations are synchronous and atomic;
/// every successful mutation persists the whole cart under the `cart` key.
pub struct CartStore {
    store: Arc<dyn DurableStore>,
    cart: Mutex<Cart>,
}

impl CartStore {
    /// Load the persisted cart from the durable store, or start fresh when
    /// nothing usable is stored (missing, corrupt, or unreadable — all are
    /// treated as "no cart", logged, and recovered from).
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        let cart = match store.get(KEY_CART) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Cart>(&bytes) {
                Ok(cart) => {
                    debug!(
                        session_id = %cart.session_id,
                        items = cart.items.len(),
                        "restored persisted cart"
                    );
                    cart
                }
                Err(e) => {
                    warn!("persisted cart unreadable, starting fresh: {e}");
                    Cart::new()
                }
            },
            Ok(None) => Cart::new(),
            Err(e) => {
                warn!("cart load failed, starting fresh: {e}");
                Cart::new()
            }
        };
        Self {
            store,
            cart: Mutex::new(cart),
        }
    }

    /// Snapshot of the current cart.
    pub fn cart(&self) -> Cart {
        self.cart.lock().expect("cart lock poisoned").clone()
    }

    /// Add an item to the cart. Merges into an existing line with the same
    /// item id by summing quantities (and overwriting notes when the incoming
    /// item carries any); otherwise appends a new line. Returns the updated
    /// cart.
    pub fn add_item(&self, item: CartItem) -> Cart {
        self.mutate(|cart| {
            match cart.items.iter_mut().find(|l| l.item_id == item.item_id) {
                Some(line) => {
                    line.quantity += item.quantity;
                    if item.notes.is_some() {
                        line.notes = item.notes;
                    }
                }
                None => cart.items.push(item),
            }
        })
    }

    /// Remove a line by item id. No-op when the id is absent.
    pub fn remove_item(&self, item_id: &str) -> Cart {
        self.mutate(|cart| cart.items.retain(|l| l.item_id != item_id))
    }

    /// Set a line's quantity. A quantity of zero behaves exactly like
    /// [`CartStore::remove_item`].
    pub fn update_quantity(&self, item_id: &str, quantity: u32) -> Cart {
        if quantity == 0 {
            return self.remove_item(item_id);
        }
        self.mutate(|cart| {
            if let Some(line) = cart.items.iter_mut().find(|l| l.item_id == item_id) {
                line.quantity = quantity;
            }
        })
    }

    /// Replace a line's free-text notes.
    pub fn update_notes(&self, item_id: &str, notes: Option<String>) -> Cart {
        self.mutate(|cart| {
            if let Some(line) = cart.items.iter_mut().find(|l| l.item_id == item_id) {
                line.notes = notes;
            }
        })
    }

    /// Replace the cart with a fresh one (new session id).
    pub fn clear(&self) -> Cart {
        self.mutate(|cart| *cart = Cart::new())
    }

    /// Apply a mutation, recompute the denormalized fields, persist, and
    /// return the resulting snapshot. Persistence failure is non-fatal: the
    /// in-memory cart stays authoritative for the session.
    fn mutate(&self, apply: impl FnOnce(&mut Cart)) -> Cart {
        let mut cart = self.cart.lock().expect("cart lock poisoned");
        apply(&mut cart);
        cart.recompute();
        self.persist(&cart);
        cart.clone()
    }

    fn persist(&self, cart: &Cart) {
        let bytes = match serde_json::to_vec(cart) {
            Ok(b) => b,
            Err(e) => {
                warn!("cart serialize failed, skipping persist: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(KEY_CART, &bytes) {
            warn!(session_id = %cart.session_id, "cart persist failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_store() -> Arc<MemoryStore> {
        crate::init_test_logging();
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_totals_match_price_formula() {
        let cart_store = CartStore::new(test_store());
        cart_store.add_item(CartItem::new("espresso", "Espresso", 10.0));
        let cart = cart_store.add_item(CartItem::new("bagel", "Bagel", 5.0).with_quantity(2));

        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.total, 20.0);
    }

    #[test]
    fn test_selected_customizations_priced_into_total() {
        let cart_store = CartStore::new(test_store());
        let item = CartItem::new("latte", "Latte", 4.0)
            .with_quantity(2)
            .with_customizations(vec![
                Customization {
                    label: "extra shot".into(),
                    price: 1.0,
                    selected: true,
                },
                Customization {
                    label: "oat milk".into(),
                    price: 0.5,
                    selected: false,
                },
            ]);
        let cart = cart_store.add_item(item);

        // (4.0 + 1.0) × 2, unselected add-on excluded
        assert_eq!(cart.total, 10.0);
        assert_eq!(cart.item_count, 2);
    }

    #[test]
    fn test_add_merges_existing_line_and_overwrites_notes() {
        let cart_store = CartStore::new(test_store());
        cart_store.add_item(CartItem::new("soup", "Soup", 6.0).with_notes("no salt"));
        let cart =
            cart_store.add_item(CartItem::new("soup", "Soup", 6.0).with_notes("extra bread"));

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.items[0].notes.as_deref(), Some("extra bread"));
    }

    #[test]
    fn test_add_without_notes_keeps_existing_notes() {
        let cart_store = CartStore::new(test_store());
        cart_store.add_item(CartItem::new("soup", "Soup", 6.0).with_notes("no salt"));
        let cart = cart_store.add_item(CartItem::new("soup", "Soup", 6.0));

        assert_eq!(cart.items[0].notes.as_deref(), Some("no salt"));
    }

    #[test]
    fn test_update_quantity_zero_equals_remove() {
        let via_remove = CartStore::new(test_store());
        via_remove.add_item(CartItem::new("a", "A", 1.0));
        via_remove.add_item(CartItem::new("b", "B", 2.0));
        let removed = via_remove.remove_item("a");

        let via_zero = CartStore::new(test_store());
        via_zero.add_item(CartItem::new("a", "A", 1.0));
        via_zero.add_item(CartItem::new("b", "B", 2.0));
        let zeroed = via_zero.update_quantity("a", 0);

        assert_eq!(removed.items, zeroed.items);
        assert_eq!(removed.total, zeroed.total);
        assert_eq!(removed.item_count, zeroed.item_count);
    }

    #[test]
    fn test_remove_missing_item_is_noop() {
        let cart_store = CartStore::new(test_store());
        cart_store.add_item(CartItem::new("a", "A", 1.0));
        let cart = cart_store.remove_item("ghost");

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.item_count, 1);
    }

    #[test]
    fn test_invariants_hold_across_mutation_sequences() {
        let cart_store = CartStore::new(test_store());
        cart_store.add_item(CartItem::new("a", "A", 3.0).with_quantity(2));
        cart_store.add_item(CartItem::new("b", "B", 7.5));
        cart_store.update_quantity("a", 5);
        cart_store.update_notes("b", Some("on the side".into()));
        cart_store.remove_item("missing");
        let cart = cart_store.update_quantity("b", 2);

        let expected_count: u32 = cart.items.iter().map(|i| i.quantity).sum();
        let expected_total: f64 = cart.items.iter().map(CartItem::subtotal).sum();
        assert_eq!(cart.item_count, expected_count);
        assert_eq!(cart.total, expected_total);
        assert_eq!(cart.item_count, 7);
        assert_eq!(cart.total, 30.0);
    }

    #[test]
    fn test_clear_issues_new_session_id() {
        let cart_store = CartStore::new(test_store());
        let before = cart_store.add_item(CartItem::new("a", "A", 1.0));
        let after = cart_store.clear();

        assert!(after.is_empty());
        assert_eq!(after.total, 0.0);
        assert_ne!(before.session_id, after.session_id);
    }

    #[test]
    fn test_cart_persists_and_restores_across_stores() {
        let store = test_store();
        let first = CartStore::new(store.clone());
        first.add_item(CartItem::new("a", "A", 2.5).with_quantity(4));
        let saved = first.cart();

        let second = CartStore::new(store);
        let restored = second.cart();
        assert_eq!(restored.session_id, saved.session_id);
        assert_eq!(restored.total, 10.0);
        assert_eq!(restored.item_count, 4);
    }

    #[test]
    fn test_persist_failure_keeps_memory_authoritative() {
        struct FailingStore;
        impl DurableStore for FailingStore {
            fn get(&self, _key: &str) -> crate::error::CoreResult<Option<Vec<u8>>> {
                Ok(None)
            }
            fn set(&self, _key: &str, _value: &[u8]) -> crate::error::CoreResult<()> {
                Err(crate::error::CoreError::Persistence("disk full".into()))
            }
            fn delete(&self, _key: &str) -> crate::error::CoreResult<()> {
                Ok(())
            }
        }

        let cart_store = CartStore::new(Arc::new(FailingStore));
        let cart = cart_store.add_item(CartItem::new("a", "A", 1.0));
        assert_eq!(cart.item_count, 1);
        assert_eq!(cart_store.cart().item_count, 1);
    }
}

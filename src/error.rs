//! Error taxonomy for the offline core.
//!
//! Validation errors surface synchronously to the caller with no state
//! mutated. Network errors are recoverable and drive the outbox retry path.
//! Persistence errors are logged and downgraded at the call site — the
//! in-memory state stays authoritative for the session. A cache miss is a
//! normal control-flow outcome (`Option::None`), never an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Checkout was attempted with no items in the cart.
    #[error("cannot create order: cart is empty")]
    EmptyCart,

    /// Order submission or cache fill failed at the network layer.
    /// Includes timed-out requests, which are treated identically.
    #[error("network error: {0}")]
    Network(String),

    /// The durable key-value store rejected a read or write.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoreError {
    /// Whether this error is retry-eligible (drives outbox enqueue rather
    /// than an immediate dead end).
    pub fn is_network(&self) -> bool {
        matches!(self, CoreError::Network(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(CoreError::Network("timeout".into()).is_network());
        assert!(!CoreError::EmptyCart.is_network());
        assert!(!CoreError::Persistence("disk full".into()).is_network());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CoreError::EmptyCart.to_string(),
            "cannot create order: cart is empty"
        );
        assert_eq!(
            CoreError::Network("HTTP 503".into()).to_string(),
            "network error: HTTP 503"
        );
    }
}

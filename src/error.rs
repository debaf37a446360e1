use thiserror::Error;

use crate::types::SubscriptionId;

/// Errors surfaced by the resilient transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The per-attempt timeout elapsed. Transient.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (reset, refused, DNS). Transient.
    #[error("network error: {0}")]
    Network(String),

    /// The destination is being protected, not rejecting the payload.
    /// Never counted as a retry attempt.
    #[error("circuit breaker open for {host}")]
    CircuitOpen {
        host: String,
        open_until_unix_ms: Option<u64>,
    },

    /// The request could not be built at all. Not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether the transport may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Network(_))
    }
}

/// Programming errors raised out of the dispatcher.
///
/// Delivery failures never surface here; every one of those becomes a
/// recorded attempt and a returned result.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The subscription's endpoint URL does not parse or has no host.
    #[error("subscription {subscription_id:?} has a malformed endpoint url: {url}")]
    InvalidEndpoint {
        subscription_id: SubscriptionId,
        url: String,
    },
}

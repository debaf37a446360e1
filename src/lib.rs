//! Resilient webhook fan-out for domain events.
//!
//! This crate notifies external endpoints of domain events via signed
//! HTTP callbacks, with **at-least-once delivery attempts** under
//! transient failure, proportional throttling of consistently failing
//! endpoints, and payload authenticity the receiver can prove.
//!
//! ## Guarantees
//! - Every (event, subscription) pair ends `Delivered` or dead-lettered;
//!   it never silently disappears
//! - Every attempt is recorded before the next one begins
//! - Per-destination-host circuit breaking
//! - HMAC-SHA256 signatures whenever a subscription carries a secret
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Payload ordering across subscribers
//! - Multi-region fan-out
//!
//! Event producers, the subscription registry, and durable storage are
//! external collaborators consumed through the [`SubscriptionDirectory`]
//! and [`DeliveryStore`] seams; the in-memory implementations exist for
//! tests and embedded usage.

pub mod backoff;
mod breaker;
mod directory;
mod dispatcher;
mod error;
mod signing;
mod store;
mod transport;
mod types;
mod util;

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerPhase, BreakerPolicy, BreakerRegistry, CircuitBreaker};
pub use directory::{InMemorySubscriptionDirectory, SubscriptionDirectory};
pub use dispatcher::{DispatchPolicy, Dispatcher};
pub use error::{DispatchError, TransportError};
pub use signing::{sign, verify, SIGNATURE_HEADER};
pub use store::{DeliveryStore, InMemoryDeliveryStore};
pub use transport::{
    OutboundRequest, RawTransport, ReqwestTransport, ResilientTransport, TransportPolicy,
    TransportResponse,
};
pub use types::{
    DeliveryId, DeliveryStatus, EventEnvelope, EventId, EventType, SubscriptionId, TenantId,
    WebhookDeliveryAttempt, WebhookDeliveryResult, WebhookEvent, WebhookSubscription,
};

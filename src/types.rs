use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a webhook event.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of event ids with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

/// Unique identifier for a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

/// Unique identifier for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

/// Unique identifier for a single delivery attempt.
///
/// Unique per attempt, not per event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    /// Generate a fresh delivery id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Closed enumeration of event kinds producers can emit.
///
/// Serialized by variant name, so the envelope carries e.g.
/// `"type": "OrderCreated"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OrderCreated,
    OrderUpdated,
    OrderFulfilled,
    OrderCancelled,
    PaymentReceived,
    PaymentFailed,
    PaymentRefunded,
    GalleryCreated,
    GalleryPublished,
    GalleryViewed,
    ImageDownloaded,
    ClientFavorited,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "OrderCreated",
            EventType::OrderUpdated => "OrderUpdated",
            EventType::OrderFulfilled => "OrderFulfilled",
            EventType::OrderCancelled => "OrderCancelled",
            EventType::PaymentReceived => "PaymentReceived",
            EventType::PaymentFailed => "PaymentFailed",
            EventType::PaymentRefunded => "PaymentRefunded",
            EventType::GalleryCreated => "GalleryCreated",
            EventType::GalleryPublished => "GalleryPublished",
            EventType::GalleryViewed => "GalleryViewed",
            EventType::ImageDownloaded => "ImageDownloaded",
            EventType::ClientFavorited => "ClientFavorited",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact to be delivered.
///
/// Created once by a producer, never mutated, read many times during
/// fan-out. The dispatcher treats the payload as opaque bytes;
/// serialization and schema management are the producer's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Logical identifier for the event.
    pub id: EventId,

    /// Kind of event, from the closed enumeration.
    pub event_type: EventType,

    /// Identifier of the resource this event concerns.
    pub resource_id: String,

    /// Type tag of the resource this event concerns.
    pub resource_type: String,

    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Creation timestamp, epoch milliseconds.
    pub created_at_unix_ms: u64,

    /// Pre-serialized event payload.
    pub payload: Vec<u8>,

    /// Free-form metadata. Ordering is irrelevant.
    pub metadata: HashMap<String, String>,
}

impl WebhookEvent {
    /// Create a new event with empty metadata.
    pub fn new(
        id: impl Into<String>,
        event_type: EventType,
        tenant_id: impl Into<String>,
        created_at_unix_ms: u64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: EventId(id.into()),
            event_type,
            resource_id: String::new(),
            resource_type: String::new(),
            tenant_id: TenantId(tenant_id.into()),
            created_at_unix_ms,
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach the resource this event concerns.
    pub fn with_resource(
        mut self,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        self.resource_id = resource_id.into();
        self.resource_type = resource_type.into();
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A tenant's registered receiver.
///
/// Owned by the external subscription registry; the dispatcher only
/// reads it. A `WebhookSubscription` is pure configuration with no
/// internal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    /// Logical identifier for the subscription.
    pub id: SubscriptionId,

    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Destination URL for webhook delivery.
    pub endpoint_url: String,

    /// Optional shared secret for HMAC signing.
    ///
    /// Deliveries to a subscription with a secret are always signed;
    /// a subscription without one never receives a signature header.
    pub secret: Option<String>,

    /// Event kinds this subscription wants.
    pub subscribed_events: Vec<EventType>,

    /// Inactive subscriptions are skipped during fan-out.
    pub is_active: bool,

    /// Creation timestamp, epoch milliseconds.
    pub created_at_unix_ms: u64,

    /// Optional human-readable description.
    pub description: Option<String>,
}

impl WebhookSubscription {
    /// Create an active subscription with no secret.
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        endpoint_url: impl Into<String>,
        subscribed_events: Vec<EventType>,
    ) -> Self {
        Self {
            id: SubscriptionId(id.into()),
            tenant_id: TenantId(tenant_id.into()),
            endpoint_url: endpoint_url.into(),
            secret: None,
            subscribed_events,
            is_active: true,
            created_at_unix_ms: 0,
            description: None,
        }
    }

    /// Set a shared secret for HMAC signing.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Mark the subscription active or inactive.
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether this subscription wants the given event kind.
    pub fn is_subscribed_to(&self, event_type: EventType) -> bool {
        self.subscribed_events.contains(&event_type)
    }
}

/// One HTTP attempt against one subscription for one event.
///
/// Immutable once recorded. The sequence of attempts for one
/// (event, subscription) pair is an append-only delivery history with
/// contiguous attempt numbers starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryAttempt {
    pub delivery_id: DeliveryId,
    pub subscription_id: SubscriptionId,
    pub event_id: EventId,

    /// 1-based, monotonically increasing within a delivery sequence.
    pub attempt_number: u32,

    /// When the next attempt is due. `None` on success or when the
    /// sequence is terminal.
    pub next_attempt_unix_ms: Option<u64>,

    /// HTTP status of the response, absent on transport-level failure.
    pub response_status: Option<u16>,

    /// Response body, truncated to the dispatcher's cap.
    pub response_body: Option<String>,

    /// Error text for transport-level failures.
    pub error: Option<String>,

    /// When the attempt was made, epoch milliseconds.
    pub attempted_at_unix_ms: u64,
}

impl WebhookDeliveryAttempt {
    /// A terminal attempt carries no next-attempt timestamp.
    pub fn is_terminal(&self) -> bool {
        self.next_attempt_unix_ms.is_none()
    }
}

/// Delivery lifecycle status for the attempt just made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// A 2xx response was observed.
    Delivered,
    /// The attempt failed and a retry is scheduled.
    Failed,
    /// The attempt ceiling was reached without success. Terminal.
    DeadLettered,
}

/// Caller-facing summary of the current attempt in a delivery sequence.
///
/// Derived from the attempt just recorded, never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryResult {
    pub delivery_id: DeliveryId,
    pub event_id: EventId,
    pub subscription_id: SubscriptionId,
    pub status: DeliveryStatus,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub attempt_number: u32,
    pub attempted_at_unix_ms: u64,
    pub next_retry_at_unix_ms: Option<u64>,
}

/// Canonical wire wrapper sent to subscribers.
///
/// Independent of the internal event representation; camelCase on the
/// wire, with the payload embedded as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub occurred_at_unix_ms: u64,
    pub tenant_id: String,
    pub payload_json: String,
}

impl EventEnvelope {
    /// Build the envelope for an event.
    pub fn from_event(event: &WebhookEvent) -> Self {
        Self {
            id: event.id.0.clone(),
            event_type: event.event_type,
            occurred_at_unix_ms: event.created_at_unix_ms,
            tenant_id: event.tenant_id.0.clone(),
            payload_json: String::from_utf8_lossy(&event.payload).into_owned(),
        }
    }

    /// Serialize to the exact bytes that get signed and sent.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{EventId, SubscriptionId, WebhookDeliveryAttempt, WebhookEvent};

/// Append-only record of delivery attempts.
///
/// Implementations must tolerate concurrent appends from parallel
/// dispatch sequences without lost writes; records are keyed by
/// (event id, subscription id, attempt number) and never edited.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist the event itself so a crash-recovery sweep can rebuild
    /// the real envelope. Recording the same event twice is a no-op.
    async fn record_event(&self, event: &WebhookEvent);

    /// Look up a previously recorded event.
    async fn get_event(&self, event_id: &EventId) -> Option<WebhookEvent>;

    /// Append one attempt to the delivery history.
    async fn record_attempt(&self, attempt: &WebhookDeliveryAttempt);

    /// Escalate a sequence that exhausted its retry budget.
    async fn mark_dead_letter(&self, attempt: &WebhookDeliveryAttempt);

    /// Stalled sequences whose scheduled retry time has passed.
    ///
    /// Returns only the latest attempt per (event, subscription) pair,
    /// and only when that attempt is non-terminal and overdue. A pair
    /// whose in-process loop is still running has a future timestamp
    /// and stays out of the result.
    async fn due_attempts(&self, now_unix_ms: u64) -> Vec<WebhookDeliveryAttempt>;

    /// Full history for one (event, subscription) pair, in attempt order.
    async fn attempts_for(
        &self,
        event_id: &EventId,
        subscription_id: &SubscriptionId,
    ) -> Vec<WebhookDeliveryAttempt>;

    /// Sequences that exhausted their retry budget, for operator review.
    async fn dead_letters(&self) -> Vec<WebhookDeliveryAttempt>;
}

/// In-memory store for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryDeliveryStore {
    events: Mutex<HashMap<EventId, WebhookEvent>>,
    attempts: Mutex<Vec<WebhookDeliveryAttempt>>,
    dead_letters: Mutex<Vec<WebhookDeliveryAttempt>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn record_event(&self, event: &WebhookEvent) {
        self.events
            .lock()
            .await
            .entry(event.id.clone())
            .or_insert_with(|| event.clone());
    }

    async fn get_event(&self, event_id: &EventId) -> Option<WebhookEvent> {
        self.events.lock().await.get(event_id).cloned()
    }

    async fn record_attempt(&self, attempt: &WebhookDeliveryAttempt) {
        self.attempts.lock().await.push(attempt.clone());
    }

    async fn mark_dead_letter(&self, attempt: &WebhookDeliveryAttempt) {
        self.dead_letters.lock().await.push(attempt.clone());
    }

    async fn due_attempts(&self, now_unix_ms: u64) -> Vec<WebhookDeliveryAttempt> {
        let attempts = self.attempts.lock().await;

        let mut latest: HashMap<(EventId, SubscriptionId), &WebhookDeliveryAttempt> =
            HashMap::new();
        for attempt in attempts.iter() {
            let key = (attempt.event_id.clone(), attempt.subscription_id.clone());
            let newer = latest
                .get(&key)
                .map_or(true, |existing| attempt.attempt_number > existing.attempt_number);
            if newer {
                latest.insert(key, attempt);
            }
        }

        latest
            .into_values()
            .filter(|attempt| {
                attempt
                    .next_attempt_unix_ms
                    .is_some_and(|due| due <= now_unix_ms)
            })
            .cloned()
            .collect()
    }

    async fn attempts_for(
        &self,
        event_id: &EventId,
        subscription_id: &SubscriptionId,
    ) -> Vec<WebhookDeliveryAttempt> {
        let attempts = self.attempts.lock().await;
        let mut history: Vec<WebhookDeliveryAttempt> = attempts
            .iter()
            .filter(|a| &a.event_id == event_id && &a.subscription_id == subscription_id)
            .cloned()
            .collect();
        history.sort_by_key(|a| a.attempt_number);
        history
    }

    async fn dead_letters(&self) -> Vec<WebhookDeliveryAttempt> {
        self.dead_letters.lock().await.clone()
    }
}

use std::sync::Arc;

use url::Url;

use crate::backoff::{self, BackoffPolicy};
use crate::directory::SubscriptionDirectory;
use crate::error::DispatchError;
use crate::signing::{self, SIGNATURE_HEADER};
use crate::store::DeliveryStore;
use crate::transport::{OutboundRequest, RawTransport, ResilientTransport, TransportPolicy};
use crate::types::{
    DeliveryId, DeliveryStatus, EventEnvelope, WebhookDeliveryAttempt, WebhookDeliveryResult,
    WebhookEvent, WebhookSubscription,
};
use crate::util::now_unix_ms;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Cross-attempt delivery configuration.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Attempt ceiling per (event, subscription) pair, including the
    /// first attempt. Reaching it without a 2xx dead-letters the pair.
    pub max_attempts: u32,

    /// Backoff between dispatcher-level attempts.
    pub backoff: BackoffPolicy,

    /// Cap applied to recorded response bodies.
    pub max_response_body_len: usize,

    /// User-agent header identifying the sending platform.
    pub user_agent: String,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            max_response_body_len: 4_096,
            user_agent: "webhook-courier/1.0".to_string(),
        }
    }
}

/// Top-level delivery orchestrator.
///
/// Builds the signed envelope, drives the attempt loop per subscriber,
/// records every attempt in the delivery store, and decides retry
/// versus dead-letter. This loop is distinct from the transport's
/// internal transient-failure retries: the transport smooths over
/// hiccups inside one attempt, the dispatcher owns cross-attempt
/// persistence and the attempt ceiling.
///
/// Each `dispatch` call is a sequential state machine; concurrency
/// comes from invoking it for independent (event, subscription) pairs.
/// Dropping or aborting the returned future cancels the in-flight send
/// and any pending backoff sleep, leaving the last recorded attempt as
/// the final state.
pub struct Dispatcher {
    transport: ResilientTransport,
    directory: Arc<dyn SubscriptionDirectory>,
    store: Arc<dyn DeliveryStore>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        raw_transport: Arc<dyn RawTransport>,
        directory: Arc<dyn SubscriptionDirectory>,
        store: Arc<dyn DeliveryStore>,
        policy: DispatchPolicy,
        transport_policy: TransportPolicy,
    ) -> Self {
        Self {
            transport: ResilientTransport::new(raw_transport, transport_policy),
            directory,
            store,
            policy,
        }
    }

    /// Deliver one event to one subscription, retrying per policy.
    ///
    /// Every delivery failure becomes a recorded attempt and a returned
    /// result; the only error out of here is a malformed subscription.
    pub async fn dispatch(
        &self,
        event: &WebhookEvent,
        subscription: &WebhookSubscription,
    ) -> Result<WebhookDeliveryResult, DispatchError> {
        validate_subscription(subscription)?;
        self.store.record_event(event).await;
        self.run_attempt_loop(event, subscription, 1).await
    }

    /// Fan an event out to every interested, active subscription of its
    /// tenant. Sequential; a failing subscriber never aborts delivery
    /// to the others.
    pub async fn dispatch_to_all_subscribers(
        &self,
        event: &WebhookEvent,
    ) -> Vec<WebhookDeliveryResult> {
        let subscriptions = self
            .directory
            .active_subscriptions_for_event(&event.tenant_id, event.event_type)
            .await;

        let mut results = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            match self.dispatch(event, subscription).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::warn!(
                        subscription_id = %subscription.id.0,
                        error = %err,
                        "skipping malformed subscription during fan-out"
                    );
                    metric_inc("webhook.dispatch.invalid_subscription");
                }
            }
        }
        results
    }

    /// Crash-recovery sweep for sequences that were scheduled but never
    /// retried in-process.
    ///
    /// The in-process sleep-and-retry loop in [`dispatch`] is the
    /// authoritative retry mechanism; this sweep only resumes stalled
    /// sequences, continuing at the next attempt number so histories
    /// stay contiguous. Returns the number of sequences resumed.
    ///
    /// [`dispatch`]: Dispatcher::dispatch
    pub async fn retry_failed_deliveries(&self) -> usize {
        let now = now_unix_ms();
        let due = self.store.due_attempts(now).await;
        let mut resumed = 0;

        for stalled in due {
            let Some(subscription) = self.directory.get(&stalled.subscription_id).await else {
                tracing::warn!(
                    subscription_id = %stalled.subscription_id.0,
                    "stalled delivery references an unknown subscription"
                );
                continue;
            };
            let Some(event) = self.store.get_event(&stalled.event_id).await else {
                tracing::warn!(
                    event_id = %stalled.event_id.0,
                    "stalled delivery references an unknown event"
                );
                continue;
            };
            if validate_subscription(&subscription).is_err() {
                continue;
            }

            let next_attempt = stalled.attempt_number + 1;
            if next_attempt > self.policy.max_attempts {
                continue;
            }

            tracing::debug!(
                event_id = %event.id.0,
                subscription_id = %subscription.id.0,
                attempt = next_attempt,
                "resuming stalled delivery sequence"
            );
            metric_inc("webhook.sweep.resumed");
            if self
                .run_attempt_loop(&event, &subscription, next_attempt)
                .await
                .is_ok()
            {
                resumed += 1;
            }
        }

        resumed
    }

    /// The attempt loop shared by `dispatch` and the sweep.
    ///
    /// Records an attempt for every outcome (response, transport error,
    /// circuit-open) before deciding what happens next. Attempt `n` is
    /// fully recorded before attempt `n + 1` begins.
    async fn run_attempt_loop(
        &self,
        event: &WebhookEvent,
        subscription: &WebhookSubscription,
        start_attempt: u32,
    ) -> Result<WebhookDeliveryResult, DispatchError> {
        let envelope_json = EventEnvelope::from_event(event).to_json();
        let signature = subscription
            .secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
            .map(|secret| signing::sign(envelope_json.as_bytes(), secret));

        let mut attempt_number = start_attempt.max(1);

        loop {
            let mut request = OutboundRequest::new(
                &subscription.endpoint_url,
                envelope_json.clone().into_bytes(),
            )
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_header("User-Agent", self.policy.user_agent.clone());
            if let Some(signature) = &signature {
                request = request.with_header(SIGNATURE_HEADER, signature.clone());
            }

            let outcome = self.transport.send(&request).await;
            let attempted_at = now_unix_ms();
            let is_last = attempt_number >= self.policy.max_attempts;
            let retry_delay =
                (!is_last).then(|| backoff::delay(attempt_number, &self.policy.backoff));
            let scheduled_next =
                retry_delay.map(|delay| attempted_at + delay.as_millis() as u64);

            let attempt = match &outcome {
                Ok(response) => {
                    let success = response.is_success();
                    WebhookDeliveryAttempt {
                        delivery_id: DeliveryId::generate(),
                        subscription_id: subscription.id.clone(),
                        event_id: event.id.clone(),
                        attempt_number,
                        next_attempt_unix_ms: if success { None } else { scheduled_next },
                        response_status: Some(response.status),
                        response_body: Some(truncate(
                            &response.body,
                            self.policy.max_response_body_len,
                        )),
                        error: None,
                        attempted_at_unix_ms: attempted_at,
                    }
                }
                Err(err) => WebhookDeliveryAttempt {
                    delivery_id: DeliveryId::generate(),
                    subscription_id: subscription.id.clone(),
                    event_id: event.id.clone(),
                    attempt_number,
                    next_attempt_unix_ms: scheduled_next,
                    response_status: None,
                    response_body: None,
                    error: Some(err.to_string()),
                    attempted_at_unix_ms: attempted_at,
                },
            };

            self.store.record_attempt(&attempt).await;
            metric_inc("webhook.dispatch.attempt");

            let succeeded = matches!(&outcome, Ok(response) if response.is_success());
            let status = if succeeded {
                DeliveryStatus::Delivered
            } else if is_last {
                DeliveryStatus::DeadLettered
            } else {
                DeliveryStatus::Failed
            };

            match status {
                DeliveryStatus::Delivered => {
                    tracing::info!(
                        event_id = %event.id.0,
                        subscription_id = %subscription.id.0,
                        attempt = attempt_number,
                        "webhook delivered"
                    );
                    metric_inc("webhook.dispatch.delivered");
                    return Ok(result_from(&attempt, status));
                }
                DeliveryStatus::DeadLettered => {
                    self.store.mark_dead_letter(&attempt).await;
                    tracing::warn!(
                        event_id = %event.id.0,
                        subscription_id = %subscription.id.0,
                        attempts = attempt_number,
                        "delivery dead-lettered after exhausting attempts"
                    );
                    metric_inc("webhook.dispatch.dead_lettered");
                    return Ok(result_from(&attempt, status));
                }
                DeliveryStatus::Failed => {
                    let delay = retry_delay.expect("non-terminal attempt has a retry delay");
                    tracing::debug!(
                        event_id = %event.id.0,
                        subscription_id = %subscription.id.0,
                        attempt = attempt_number,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, backing off"
                    );
                    metric_inc("webhook.dispatch.retry");
                    tokio::time::sleep(delay).await;
                    attempt_number += 1;
                }
            }
        }
    }
}

fn result_from(attempt: &WebhookDeliveryAttempt, status: DeliveryStatus) -> WebhookDeliveryResult {
    WebhookDeliveryResult {
        delivery_id: attempt.delivery_id.clone(),
        event_id: attempt.event_id.clone(),
        subscription_id: attempt.subscription_id.clone(),
        status,
        http_status: attempt.response_status,
        response_body: attempt.response_body.clone(),
        error: attempt.error.clone(),
        attempt_number: attempt.attempt_number,
        attempted_at_unix_ms: attempt.attempted_at_unix_ms,
        next_retry_at_unix_ms: attempt.next_attempt_unix_ms,
    }
}

fn validate_subscription(subscription: &WebhookSubscription) -> Result<(), DispatchError> {
    let invalid = || DispatchError::InvalidEndpoint {
        subscription_id: subscription.id.clone(),
        url: subscription.endpoint_url.clone(),
    };

    let parsed = Url::parse(&subscription.endpoint_url).map_err(|_| invalid())?;
    if parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

fn truncate(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

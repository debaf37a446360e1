use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::backoff::{self, BackoffPolicy};
use crate::breaker::{BreakerPolicy, BreakerRegistry};
use crate::error::TransportError;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// A fully buffered outbound POST.
///
/// Headers and body are owned, so a retry re-sends the exact same
/// request without the re-readability problems of streaming bodies.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response observed from the destination.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Black-box "send request, get response" primitive.
///
/// TLS, DNS and connection pooling live behind this seam; tests inject
/// scripted implementations.
#[async_trait]
pub trait RawTransport: Send + Sync {
    async fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a shared `reqwest` client.
#[derive(Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RawTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .body(request.body.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Retry and circuit-breaking configuration for the transport.
#[derive(Debug, Clone)]
pub struct TransportPolicy {
    /// Per-attempt send timeout.
    pub timeout: Duration,

    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Status codes worth a fast in-transport retry.
    pub retry_status_codes: Vec<u16>,

    pub backoff: BackoffPolicy,
    pub breaker: BreakerPolicy,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_status_codes: vec![408, 429, 500, 502, 503, 504],
            backoff: BackoffPolicy::new(
                Duration::from_millis(200),
                Duration::from_secs(5),
                100,
            ),
            breaker: BreakerPolicy::default(),
        }
    }
}

/// Wraps a raw transport with transient-failure retries and per-host
/// circuit-breaker gating.
///
/// Exhausting retries hands the last response or error back to the
/// caller; nothing is persisted here. Persistence and the coarser
/// cross-attempt loop belong to the dispatcher.
pub struct ResilientTransport {
    raw: Arc<dyn RawTransport>,
    policy: TransportPolicy,
    breakers: BreakerRegistry,
}

impl ResilientTransport {
    pub fn new(raw: Arc<dyn RawTransport>, policy: TransportPolicy) -> Self {
        let breakers = BreakerRegistry::new(policy.breaker.clone());
        Self { raw, policy, breakers }
    }

    /// Send with retry-on-transient and breaker gating.
    ///
    /// A breaker denial fails fast with [`TransportError::CircuitOpen`]
    /// and does not consume a retry.
    pub async fn send(
        &self,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        let host = host_of(&request.url)?;
        let breaker = self.breakers.for_host(&host);
        let mut attempt: u32 = 0;

        loop {
            if !breaker.allow_request() {
                metric_inc("webhook.transport.circuit_open");
                return Err(TransportError::CircuitOpen {
                    host,
                    open_until_unix_ms: breaker.open_until_unix_ms(),
                });
            }

            match self.raw.send(request, self.policy.timeout).await {
                Ok(response) => {
                    if response.is_success() {
                        breaker.record_success();
                        metric_inc("webhook.transport.success");
                        return Ok(response);
                    }
                    if !self.is_retryable_status(response.status) {
                        return Ok(response);
                    }
                    breaker.record_failure();
                    if attempt >= self.policy.max_retries {
                        metric_inc("webhook.transport.retries_exhausted");
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if !err.is_transient() {
                        return Err(err);
                    }
                    breaker.record_failure();
                    if attempt >= self.policy.max_retries {
                        metric_inc("webhook.transport.retries_exhausted");
                        return Err(err);
                    }
                }
            }

            attempt += 1;
            let delay = backoff::delay(attempt, &self.policy.backoff);
            tracing::debug!(
                host = %host,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying transient transport failure"
            );
            metric_inc("webhook.transport.retry");
            tokio::time::sleep(delay).await;
        }
    }

    fn is_retryable_status(&self, status: u16) -> bool {
        self.policy.retry_status_codes.contains(&status)
    }
}

fn host_of(url: &str) -> Result<String, TransportError> {
    let parsed = Url::parse(url)
        .map_err(|err| TransportError::InvalidRequest(format!("{url}: {err}")))?;
    match parsed.host_str() {
        Some(host) => Ok(host.to_string()),
        None => Err(TransportError::InvalidRequest(format!("{url}: missing host"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Raw transport that replays a script of outcomes.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RawTransport for ScriptedTransport {
        async fn send(
            &self,
            _request: &OutboundRequest,
            _timeout: Duration,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TransportResponse { status: 200, body: String::new() }))
        }
    }

    fn status(code: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse { status: code, body: format!("status {code}") })
    }

    fn fast_policy(max_retries: u32) -> TransportPolicy {
        TransportPolicy {
            timeout: Duration::from_secs(1),
            max_retries,
            backoff: BackoffPolicy::without_jitter(
                Duration::from_millis(1),
                Duration::from_millis(2),
            ),
            ..TransportPolicy::default()
        }
    }

    fn request() -> OutboundRequest {
        OutboundRequest::new("https://receiver.example.com/hook", b"{}".to_vec())
    }

    #[tokio::test]
    async fn success_passes_through() {
        let raw = ScriptedTransport::new(vec![status(204)]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(3));

        let response = transport.send(&request()).await.unwrap();

        assert_eq!(response.status, 204);
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn retries_transient_status_then_succeeds() {
        let raw = ScriptedTransport::new(vec![status(500), status(200)]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(3));

        let response = transport.send(&request()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(raw.calls(), 2);
    }

    #[tokio::test]
    async fn non_retryable_status_returns_immediately() {
        let raw = ScriptedTransport::new(vec![status(404), status(200)]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(3));

        let response = transport.send(&request()).await.unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_response() {
        let raw = ScriptedTransport::new(vec![status(503), status(503), status(503)]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(2));

        let response = transport.send(&request()).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(raw.calls(), 3);
    }

    #[tokio::test]
    async fn transient_error_is_retried() {
        let raw = ScriptedTransport::new(vec![Err(TransportError::Timeout), status(200)]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(3));

        let response = transport.send(&request()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(raw.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let raw = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Network("reset".into())),
        ]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(1));

        let err = transport.send(&request()).await.unwrap_err();

        assert!(matches!(err, TransportError::Network(_)));
        assert_eq!(raw.calls(), 2);
    }

    #[tokio::test]
    async fn non_transient_error_propagates_immediately() {
        let raw = ScriptedTransport::new(vec![Err(TransportError::InvalidRequest("bad".into()))]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(3));

        let err = transport.send(&request()).await.unwrap_err();

        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_touching_the_wire() {
        let raw = ScriptedTransport::new(vec![status(500), status(500)]);
        let mut policy = fast_policy(0);
        policy.breaker = BreakerPolicy {
            enabled: true,
            failure_threshold: 2,
            open_duration: Duration::from_secs(60),
        };
        let transport = ResilientTransport::new(raw.clone(), policy);

        assert_eq!(transport.send(&request()).await.unwrap().status, 500);
        assert_eq!(transport.send(&request()).await.unwrap().status, 500);

        let err = transport.send(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::CircuitOpen { .. }));
        assert_eq!(raw.calls(), 2);
    }

    #[tokio::test]
    async fn breaker_is_keyed_per_host() {
        let raw = ScriptedTransport::new(vec![status(500), status(500), status(200)]);
        let mut policy = fast_policy(0);
        policy.breaker = BreakerPolicy {
            enabled: true,
            failure_threshold: 2,
            open_duration: Duration::from_secs(60),
        };
        let transport = ResilientTransport::new(raw.clone(), policy);

        let failing = OutboundRequest::new("https://down.example.com/hook", b"{}".to_vec());
        let healthy = OutboundRequest::new("https://up.example.com/hook", b"{}".to_vec());

        let _ = transport.send(&failing).await;
        let _ = transport.send(&failing).await;
        assert!(matches!(
            transport.send(&failing).await.unwrap_err(),
            TransportError::CircuitOpen { .. }
        ));

        // A different host is unaffected.
        assert_eq!(transport.send(&healthy).await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn malformed_url_is_rejected_up_front() {
        let raw = ScriptedTransport::new(vec![]);
        let transport = ResilientTransport::new(raw.clone(), fast_policy(3));

        let bad = OutboundRequest::new("not a url", b"{}".to_vec());
        let err = transport.send(&bad).await.unwrap_err();

        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert_eq!(raw.calls(), 0);
    }
}

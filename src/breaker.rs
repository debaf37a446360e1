use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::util::now_unix_ms;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    /// A disabled breaker allows every request and records nothing.
    pub enabled: bool,

    /// Consecutive failures in `Closed` before the circuit opens.
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing.
    pub open_duration: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl BreakerPolicy {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

/// Phase of the failure/recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    phase: BreakerPhase,
    consecutive_failures: u32,
    open_until_unix_ms: u64,
    probe_in_flight: bool,
}

/// Per-destination failure/recovery state machine.
///
/// Gatekeeps whether a send attempt is allowed at all. All state lives
/// behind one mutex; `allow_request`, `record_success` and
/// `record_failure` are the only mutators. At most one `HalfOpen` probe
/// is in flight at a time, and a failure observed while `HalfOpen`
/// reopens the circuit immediately, without going through the
/// consecutive-failure counter.
#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(BreakerInner {
                phase: BreakerPhase::Closed,
                consecutive_failures: 0,
                open_until_unix_ms: 0,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a send attempt may proceed right now.
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(now_unix_ms())
    }

    pub(crate) fn allow_request_at(&self, now_unix_ms: u64) -> bool {
        if !self.policy.enabled {
            return true;
        }

        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if inner.phase == BreakerPhase::Open {
            if now_unix_ms < inner.open_until_unix_ms {
                return false;
            }
            inner.phase = BreakerPhase::HalfOpen;
            inner.probe_in_flight = false;
        }

        if inner.phase == BreakerPhase::HalfOpen {
            if inner.probe_in_flight {
                return false;
            }
            inner.probe_in_flight = true;
            return true;
        }

        true
    }

    /// Record a successful send. Closes the circuit and resets the counter.
    pub fn record_success(&self) {
        if !self.policy.enabled {
            return;
        }

        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        inner.phase = BreakerPhase::Closed;
    }

    /// Record a failed send.
    pub fn record_failure(&self) {
        self.record_failure_at(now_unix_ms());
    }

    pub(crate) fn record_failure_at(&self, now_unix_ms: u64) {
        if !self.policy.enabled {
            return;
        }

        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if inner.phase == BreakerPhase::HalfOpen {
            Self::open(&mut inner, &self.policy, now_unix_ms);
            return;
        }

        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.policy.failure_threshold {
            Self::open(&mut inner, &self.policy, now_unix_ms);
        }
    }

    /// Current phase, for diagnostics.
    pub fn phase(&self) -> BreakerPhase {
        self.inner.lock().expect("breaker lock poisoned").phase
    }

    /// When the circuit reopens for probing. `None` unless `Open`.
    pub fn open_until_unix_ms(&self) -> Option<u64> {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.phase == BreakerPhase::Open {
            Some(inner.open_until_unix_ms)
        } else {
            None
        }
    }

    fn open(inner: &mut BreakerInner, policy: &BreakerPolicy, now_unix_ms: u64) {
        inner.phase = BreakerPhase::Open;
        inner.open_until_unix_ms = now_unix_ms + policy.open_duration.as_millis() as u64;
        inner.probe_in_flight = false;
    }
}

/// Breakers keyed by destination host.
///
/// One shared breaker would let failures against one endpoint throttle
/// sends to a different, healthy endpoint, so each host gets its own
/// instance, created lazily from a common policy.
#[derive(Debug)]
pub struct BreakerRegistry {
    policy: BreakerPolicy,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a host.
    pub fn for_host(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut guard = self.breakers.lock().expect("registry lock poisoned");
        guard
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.policy.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: u32, open_ms: u64) -> BreakerPolicy {
        BreakerPolicy {
            enabled: true,
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
        }
    }

    #[test]
    fn opens_after_threshold_and_denies_until_open_duration_elapses() {
        let breaker = CircuitBreaker::new(policy(2, 100));

        assert!(breaker.allow_request_at(0));
        breaker.record_failure_at(0);
        assert_eq!(breaker.phase(), BreakerPhase::Closed);

        breaker.record_failure_at(10);
        assert_eq!(breaker.phase(), BreakerPhase::Open);
        assert_eq!(breaker.open_until_unix_ms(), Some(110));

        assert!(!breaker.allow_request_at(50));
        assert!(!breaker.allow_request_at(109));
        assert!(breaker.allow_request_at(110));
        assert_eq!(breaker.phase(), BreakerPhase::HalfOpen);
    }

    #[test]
    fn half_open_allows_exactly_one_probe() {
        let breaker = CircuitBreaker::new(policy(1, 100));

        breaker.record_failure_at(0);
        assert!(breaker.allow_request_at(100));
        assert!(!breaker.allow_request_at(100));
        assert!(!breaker.allow_request_at(150));
    }

    #[test]
    fn half_open_success_closes_and_resets_counter() {
        let breaker = CircuitBreaker::new(policy(2, 100));

        breaker.record_failure_at(0);
        breaker.record_failure_at(0);
        assert!(breaker.allow_request_at(100));

        breaker.record_success();
        assert_eq!(breaker.phase(), BreakerPhase::Closed);

        // Counter was reset: one failure does not reopen.
        breaker.record_failure_at(200);
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
        assert!(breaker.allow_request_at(200));
    }

    #[test]
    fn half_open_failure_reopens_without_threshold() {
        let breaker = CircuitBreaker::new(policy(5, 100));

        for _ in 0..5 {
            breaker.record_failure_at(0);
        }
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        assert!(breaker.allow_request_at(100));
        breaker.record_failure_at(100);
        assert_eq!(breaker.phase(), BreakerPhase::Open);
        assert_eq!(breaker.open_until_unix_ms(), Some(200));
    }

    #[test]
    fn disabled_breaker_always_allows() {
        let breaker = CircuitBreaker::new(BreakerPolicy::disabled());

        for _ in 0..100 {
            breaker.record_failure_at(0);
        }
        assert!(breaker.allow_request_at(0));
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
    }

    #[test]
    fn registry_isolates_hosts() {
        let registry = BreakerRegistry::new(policy(1, 1_000));

        let a = registry.for_host("a.example.com");
        let b = registry.for_host("b.example.com");

        a.record_failure_at(0);
        assert!(!a.allow_request_at(0));
        assert!(b.allow_request_at(0));

        // Same host resolves to the same breaker instance.
        let a_again = registry.for_host("a.example.com");
        assert!(!a_again.allow_request_at(0));
    }
}

use std::time::Duration;

/// Exponential backoff parameters.
///
/// Delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at `max`,
/// plus a bounded random jitter when `jitter_ms > 0`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub base: Duration,

    /// Cap applied before jitter.
    pub max: Duration,

    /// Upper bound (exclusive) of the random jitter. Zero disables jitter.
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
            jitter_ms: 250,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter_ms: u64) -> Self {
        Self { base, max, jitter_ms }
    }

    /// Policy without jitter, for deterministic scheduling.
    pub fn without_jitter(base: Duration, max: Duration) -> Self {
        Self { base, max, jitter_ms: 0 }
    }
}

/// Compute the delay before attempt `attempt` (1-based).
pub fn delay(attempt: u32, policy: &BackoffPolicy) -> Duration {
    delay_with(attempt, policy, |ceiling| fastrand::u64(0..ceiling))
}

/// Compute the delay with an injected jitter source.
///
/// `jitter` is called with the jitter ceiling and must return a value in
/// `[0, ceiling)`. It is never called when jitter is disabled, which
/// keeps this function fully deterministic for tests.
pub fn delay_with<F>(attempt: u32, policy: &BackoffPolicy, jitter: F) -> Duration
where
    F: FnOnce(u64) -> u64,
{
    let attempt = attempt.max(1);
    let base_ms = policy.base.as_millis() as u64;
    let max_ms = policy.max.as_millis() as u64;

    let pow = 2u64.saturating_pow(attempt - 1);
    let exp_ms = base_ms.saturating_mul(pow);
    let capped_ms = exp_ms.min(max_ms);

    let jitter_ms = if policy.jitter_ms == 0 {
        0
    } else {
        jitter(policy.jitter_ms)
    };

    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

//! A three-state circuit breaker protecting calls to a flaky `EventSink`.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Consecutive failures in `Closed` before tripping to `Open`.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Consecutive successes in `HalfOpen` before resetting to `Closed`.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
/// How long `Open` waits before allowing a trial call.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for BreakerState {
    fn from(v: u8) -> Self {
        match v {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }
}

impl From<BreakerState> for u8 {
    fn from(s: BreakerState) -> u8 {
        match s {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

/// Whether a call may proceed right now, and the bookkeeping needed to
/// record its outcome afterward.
pub struct Permit {
    was_trial: bool,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Thread-safe circuit breaker. `try_acquire` decides whether a call may
/// proceed; the caller reports the outcome back via `record_success` /
/// `record_failure`.
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed.into()),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::SeqCst))
    }

    /// Returns `Some(Permit)` if a call may proceed (closed, or a trial
    /// call while half-open, or cooldown elapsed while open — in which
    /// case this call also transitions `Open -> HalfOpen`). Returns `None`
    /// if the call should be short-circuited and dropped.
    pub async fn try_acquire(&self) -> Option<Permit> {
        match self.state() {
            BreakerState::Closed => Some(Permit { was_trial: false }),
            BreakerState::HalfOpen => Some(Permit { was_trial: true }),
            BreakerState::Open => {
                let mut opened_at = self.opened_at.lock().await;
                match *opened_at {
                    Some(since) if since.elapsed() >= self.config.cooldown => {
                        self.state.store(BreakerState::HalfOpen.into(), Ordering::SeqCst);
                        self.consecutive_successes.store(0, Ordering::SeqCst);
                        *opened_at = None;
                        Some(Permit { was_trial: true })
                    }
                    _ => None,
                }
            }
        }
    }

    pub async fn record_success(&self, _permit: Permit) {
        match self.state() {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            BreakerState::HalfOpen => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.state.store(BreakerState::Closed.into(), Ordering::SeqCst);
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.consecutive_successes.store(0, Ordering::SeqCst);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn record_failure(&self, _permit: Permit) {
        match self.state() {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip().await;
                }
            }
            BreakerState::HalfOpen => {
                self.trip().await;
            }
            BreakerState::Open => {}
        }
    }

    async fn trip(&self) {
        self.state.store(BreakerState::Open.into(), Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        *self.opened_at.lock().await = Some(Instant::now());
    }
}

impl Permit {
    pub fn is_trial(&self) -> bool {
        self.was_trial
    }
}

/// Convenience wrapper combining the breaker with exponential retry of a
/// single publish attempt (capped attempts), matching `spec.md` §4.6's
/// "retries inside a single publish" contract.
pub async fn call_with_breaker<F, Fut, T, E>(
    breaker: &Arc<CircuitBreaker>,
    max_attempts: u32,
    base_backoff: Duration,
    mut call: F,
) -> Option<Result<T, E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let permit = breaker.try_acquire().await?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => {
                breaker.record_success(permit).await;
                return Some(Ok(value));
            }
            Err(err) => {
                if attempt >= max_attempts {
                    breaker.record_failure(permit).await;
                    return Some(Err(err));
                }
                tokio::time::sleep(base_backoff * attempt).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;

    #[tokio::test]
    async fn closed_allows_calls_and_trips_after_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_millis(10),
        });

        for _ in 0..2 {
            let permit = breaker.try_acquire().await.unwrap();
            breaker.record_failure(permit).await;
            assert_eq!(breaker.state(), BreakerState::Closed);
        }

        let permit = breaker.try_acquire().await.unwrap();
        breaker.record_failure(permit).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_short_circuits_until_cooldown() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            cooldown: Duration::from_millis(30),
        });

        let permit = breaker.try_acquire().await.unwrap();
        breaker.record_failure(permit).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().await.is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let permit = breaker.try_acquire().await;
        assert!(permit.is_some());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            cooldown: Duration::from_millis(10),
        });
        let permit = breaker.try_acquire().await.unwrap();
        breaker.record_failure(permit).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let p1 = breaker.try_acquire().await.unwrap();
        assert!(p1.is_trial());
        breaker.record_success(p1).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let p2 = breaker.try_acquire().await.unwrap();
        breaker.record_success(p2).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            cooldown: Duration::from_millis(10),
        });
        let permit = breaker.try_acquire().await.unwrap();
        breaker.record_failure(permit).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let p1 = breaker.try_acquire().await.unwrap();
        breaker.record_failure(p1).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn call_with_breaker_retries_before_giving_up() {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let attempts = Arc::new(Counter::new(0));
        let attempts_clone = attempts.clone();

        let result: Option<Result<(), &str>> = call_with_breaker(
            &breaker,
            3,
            Duration::from_millis(1),
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("boom")
                }
            },
        )
        .await;

        assert!(result.unwrap().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}

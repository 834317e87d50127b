//! The `Clock` capability: the one seam through which the core observes
//! time. Production code uses [`SystemClock`]; tests inject
//! [`FrozenClock`] to assert exact deadline/grace-window behavior without
//! sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Time as the rest of the core sees it: a monotonic instant (for
/// deadlines and elapsed-time arithmetic) and a wall-clock timestamp (for
/// persisted/broadcast fields like `startedAt`).
pub trait Clock: Send + Sync + 'static {
    fn now_instant(&self) -> Instant;
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real clock, backed by `Instant::now()` / `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_instant(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to, for deterministic tests of
/// grace-window expiry, matchmaking timeouts, and sweeper behavior.
#[derive(Clone)]
pub struct FrozenClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    offset_millis: Arc<AtomicI64>,
}

impl FrozenClock {
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_utc: Utc::now(),
            offset_millis: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Advances the clock by `duration`. Affects every handle cloned from
    /// this one.
    pub fn advance(&self, duration: Duration) {
        self.offset_millis.fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_millis.load(Ordering::SeqCst).max(0) as u64)
    }
}

impl Default for FrozenClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FrozenClock {
    fn now_instant(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.base_utc + chrono::Duration::from_std(self.offset()).unwrap_or_default()
    }
}

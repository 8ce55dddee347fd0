//! Fixed-window request budgets.
//!
//! Every verification request passes two gates: the caller's own key and the
//! service-wide [`GLOBAL_KEY`]. Each key carries a minute window and an hour
//! window; a window starts on first touch (or first touch after expiry) and
//! runs a fixed interval from that instant. Both counters increment before
//! either decision, so a denied request still consumes budget in both
//! windows. The key table is LRU-bounded so spoofed actor ids cannot grow
//! memory without bound.

use crate::error::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Key charged on every request in addition to the actor's own key.
pub const GLOBAL_KEY: &str = "__global__";

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

/// Millisecond clock, injectable so window arithmetic is testable.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time source used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Counters for one key. Reset timestamps of zero mean the window has
/// never been touched, so the first request lands on the expiry path.
#[derive(Debug, Clone, Copy, Default)]
struct WindowState {
    minute_count: u32,
    minute_reset_at: u64,
    hour_count: u32,
    hour_reset_at: u64,
}

/// Running totals for monitoring.
#[derive(Debug, Default, Clone)]
pub struct QuotaStats {
    /// Requests that passed both tiers.
    pub allowed: u64,
    /// Requests denied by either tier.
    pub denied: u64,
}

/// Fixed-window quota store shared across request handlers.
///
/// Check-then-increment is atomic per call: one mutex guards the whole key
/// table, and no await happens while it is held.
#[derive(Clone)]
pub struct QuotaStore {
    windows: Arc<Mutex<LruCache<String, WindowState>>>,
    stats: Arc<Mutex<QuotaStats>>,
    clock: Arc<dyn Clock>,
}

impl QuotaStore {
    /// Create a store tracking at most `max_keys` distinct keys.
    #[must_use]
    pub fn new(max_keys: usize) -> Self {
        Self::with_clock(max_keys, Arc::new(SystemClock))
    }

    /// Create a store with an explicit time source.
    #[must_use]
    pub fn with_clock(max_keys: usize, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(max_keys.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            windows: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(QuotaStats::default())),
            clock,
        }
    }

    /// Charge one request against `key` and decide whether it may proceed.
    ///
    /// Both windows are charged before either limit is evaluated, so a call
    /// denied by one tier still consumes budget in the other. The minute
    /// tier is evaluated first, so a denial reports the smaller remaining
    /// reset. A limit of zero or below disables its tier entirely: no
    /// counting, never a denial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] with the seconds until the denying
    /// window resets.
    pub fn check_and_consume(&self, key: &str, per_minute: i64, per_hour: i64) -> Result<()> {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        let mut state = windows.get(key).copied().unwrap_or_default();

        if per_minute > 0 {
            if now >= state.minute_reset_at {
                state.minute_count = 0;
                state.minute_reset_at = now + MINUTE_MS;
            }
            state.minute_count += 1;
        }
        if per_hour > 0 {
            if now >= state.hour_reset_at {
                state.hour_count = 0;
                state.hour_reset_at = now + HOUR_MS;
            }
            state.hour_count += 1;
        }
        windows.put(key.to_string(), state);

        if per_minute > 0 && i64::from(state.minute_count) > per_minute {
            self.stats.lock().denied += 1;
            return Err(Error::RateLimited {
                retry_after_secs: retry_after(state.minute_reset_at, now),
            });
        }
        if per_hour > 0 && i64::from(state.hour_count) > per_hour {
            self.stats.lock().denied += 1;
            return Err(Error::RateLimited {
                retry_after_secs: retry_after(state.hour_reset_at, now),
            });
        }

        self.stats.lock().allowed += 1;
        Ok(())
    }

    /// Current monitoring totals.
    #[must_use]
    pub fn stats(&self) -> QuotaStats {
        self.stats.lock().clone()
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

fn retry_after(reset_at: u64, now: u64) -> u64 {
    reset_at.saturating_sub(now).div_ceil(1000)
}

//! Shared quota gate for every upstream call.
//!
//! Two nested windows are consulted under one lock:
//!
//! - a rolling short window holding at most `per_minute` grants, tracked as a
//!   log of grant instants so the ceiling holds for *every* rolling window
//! - a calendar-day counter reset at the next UTC midnight
//!
//! The limiter only counts calls; it knows nothing about tickers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use time::Date;
use tokio::time::Instant;

use crate::domain::UtcDateTime;

/// Ceilings for the two windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Grants allowed within any rolling `window`; `0` denies every call.
    pub per_minute: u32,
    #[serde(with = "crate::config::duration_secs")]
    pub window: Duration,
    /// Grants allowed per UTC calendar day; `0` disables the daily window.
    pub per_day: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            per_minute: 5,
            window: Duration::from_secs(60),
            per_day: 500,
        }
    }
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub granted: bool,
    /// Estimated wait before a retry could be granted; zero on grant.
    pub retry_after: Duration,
}

impl Permit {
    const fn granted() -> Self {
        Self {
            granted: true,
            retry_after: Duration::ZERO,
        }
    }

    const fn denied(retry_after: Duration) -> Self {
        Self {
            granted: false,
            retry_after,
        }
    }
}

/// Capacity view of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowState {
    pub limit: u32,
    pub remaining: u32,
    /// Time until at least one more grant becomes available; `None` while capacity remains.
    #[serde(rename = "replenishes_in_ms", serialize_with = "serialize_optional_millis")]
    pub replenishes_in: Option<Duration>,
}

fn serialize_optional_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .map(|wait| u64::try_from(wait.as_millis()).unwrap_or(u64::MAX))
        .serialize(serializer)
}

/// Point-in-time view of both windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterState {
    pub short_window: WindowState,
    /// `None` when the daily ceiling is disabled.
    pub long_window: Option<WindowState>,
}

#[derive(Debug)]
struct LimiterInner {
    grants: VecDeque<Instant>,
    day: Option<Date>,
    used_today: u32,
}

impl LimiterInner {
    fn roll(&mut self, config: &LimiterConfig, now: Instant, wall: UtcDateTime) {
        while let Some(oldest) = self.grants.front() {
            if *oldest + config.window <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }

        let today = wall.date();
        if self.day != Some(today) {
            self.day = Some(today);
            self.used_today = 0;
        }
    }

    fn short_wait(&self, config: &LimiterConfig, now: Instant) -> Duration {
        if self.grants.len() < config.per_minute as usize {
            return Duration::ZERO;
        }
        // With no grants logged only a zero ceiling lands here.
        self.grants.front().map_or(config.window.max(Duration::from_secs(1)), |oldest| {
            (*oldest + config.window).saturating_duration_since(now)
        })
    }

    fn long_wait(&self, config: &LimiterConfig, wall: UtcDateTime) -> Duration {
        if config.per_day == 0 || self.used_today < config.per_day {
            return Duration::ZERO;
        }
        wall.next_midnight().duration_since(wall)
    }
}

/// Nested-window rate limiter shared by the resolver and the scheduler.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(LimiterInner {
                grants: VecDeque::with_capacity(config.per_minute as usize),
                day: None,
                used_today: 0,
            }),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    // A poisoned lock means a panic mid-decision; the log stays usable.
    fn lock(&self) -> MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Non-blocking grant decision against the most restrictive window.
    pub fn try_acquire(&self) -> Permit {
        self.try_acquire_at(Instant::now(), UtcDateTime::now())
    }

    /// [`Self::try_acquire`] with explicit monotonic and wall clocks.
    pub fn try_acquire_at(&self, now: Instant, wall: UtcDateTime) -> Permit {
        let mut inner = self.lock();
        inner.roll(&self.config, now, wall);

        let retry_after = inner
            .short_wait(&self.config, now)
            .max(inner.long_wait(&self.config, wall));
        if !retry_after.is_zero() {
            tracing::debug!(
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "rate limiter denied upstream call"
            );
            return Permit::denied(retry_after);
        }

        inner.grants.push_back(now);
        inner.used_today = inner.used_today.saturating_add(1);
        Permit::granted()
    }

    pub fn snapshot(&self) -> RateLimiterState {
        self.snapshot_at(Instant::now(), UtcDateTime::now())
    }

    pub fn snapshot_at(&self, now: Instant, wall: UtcDateTime) -> RateLimiterState {
        let mut inner = self.lock();
        inner.roll(&self.config, now, wall);

        let used = u32::try_from(inner.grants.len()).unwrap_or(u32::MAX);
        let short_wait = inner.short_wait(&self.config, now);
        let short_window = WindowState {
            limit: self.config.per_minute,
            remaining: self.config.per_minute.saturating_sub(used),
            replenishes_in: (!short_wait.is_zero()).then_some(short_wait),
        };

        let long_window = (self.config.per_day > 0).then(|| {
            let long_wait = inner.long_wait(&self.config, wall);
            WindowState {
                limit: self.config.per_day,
                remaining: self.config.per_day.saturating_sub(inner.used_today),
                replenishes_in: (!long_wait.is_zero()).then_some(long_wait),
            }
        });

        RateLimiterState {
            short_window,
            long_window,
        }
    }
}

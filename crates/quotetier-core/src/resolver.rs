//! Read path: tier fallthrough for a single query.
//!
//! `get_current` consults the hot cache, then the warm store, and only then
//! the rate-limited upstream provider, writing successful fetches back through
//! both tiers. Concurrent misses for one ticker share a single upstream call.
//! When the quota or the provider refuses, the newest stored point is served
//! with `stale = true` instead of failing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cache::{current_price_key, HotCache};
use crate::domain::{Interval, PricePoint, PriceSource, Ticker, UtcDateTime};
use crate::error::{NotFoundReason, ResolveError};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryConfig;
use crate::single_flight::SingleFlight;
use crate::upstream::{UpstreamError, UpstreamErrorKind, UpstreamProvider};
use crate::warm_store::{RangeQuery, WarmStore};

/// Freshness, timeout and paging knobs for the read path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Oldest warm point served as fresh.
    #[serde(with = "crate::config::duration_secs")]
    pub max_age: Duration,
    /// Lifetime of hot-cache entries written by the resolver.
    #[serde(with = "crate::config::duration_secs")]
    pub hot_ttl: Duration,
    /// How long a provider `NotFound` short-circuits further lookups.
    #[serde(with = "crate::config::duration_secs")]
    pub not_found_ttl: Duration,
    #[serde(with = "crate::config::duration_millis")]
    pub upstream_timeout: Duration,
    /// How far before a requested instant `get_at` searches.
    #[serde(with = "crate::config::duration_secs")]
    pub history_lookback: Duration,
    pub page_size: usize,
    pub max_range_points: usize,
    pub retry: RetryConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(15 * 60),
            hot_ttl: Duration::from_secs(60),
            not_found_ttl: Duration::from_secs(3_600),
            upstream_timeout: Duration::from_secs(5),
            history_lookback: Duration::from_secs(7 * 86_400),
            page_size: 500,
            max_range_points: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

/// The shared tiers and quota gate, handed to both the resolver and the
/// refresh scheduler.
///
/// Clones share one set of in-flight upstream fetches, so a read and a
/// scheduled refresh of the same ticker never call the provider twice.
#[derive(Clone)]
pub struct Tiers {
    pub hot: Arc<dyn HotCache>,
    pub warm: Arc<dyn WarmStore>,
    pub upstream: Arc<dyn UpstreamProvider>,
    pub limiter: Arc<RateLimiter>,
    flights: Arc<SingleFlight<Ticker, Fetched>>,
}

impl Tiers {
    pub fn new(
        hot: Arc<dyn HotCache>,
        warm: Arc<dyn WarmStore>,
        upstream: Arc<dyn UpstreamProvider>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            hot,
            warm,
            upstream,
            limiter,
            flights: Arc::new(SingleFlight::new()),
        }
    }

    /// Upstream fetches currently in flight.
    pub fn fetches_in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Join the fetch already in flight for `ticker`, or lead one with `work`.
    pub(crate) async fn fetch_once<F, Fut>(&self, ticker: &Ticker, work: F) -> Fetched
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Fetched>,
    {
        self.flights.run(ticker.clone(), work).await
    }
}

/// One page of a range read plus the cursor for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangePage {
    pub points: Vec<PricePoint>,
    /// Pass as `after` to continue; `None` once the range is exhausted.
    pub next_after: Option<UtcDateTime>,
}

/// Result of [`PriceResolver::backfill`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackfillOutcome {
    Stored { batch_id: String, rows: usize },
    Deferred { retry_after_ms: u64 },
}

/// What one shared upstream fetch produced; every joined caller sees a clone.
#[derive(Debug, Clone)]
pub(crate) enum Fetched {
    Point(PricePoint),
    Denied { retry_after: Duration },
    TimedOut,
    Failed(UpstreamError),
}

/// Tiered price lookups.
pub struct PriceResolver {
    tiers: Tiers,
    config: ResolverConfig,
    unknown: Mutex<HashMap<Ticker, Instant>>,
}

impl PriceResolver {
    pub fn new(tiers: Tiers, config: ResolverConfig) -> Self {
        Self {
            tiers,
            config,
            unknown: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn tiers(&self) -> &Tiers {
        &self.tiers
    }

    /// Current price of `ticker`.
    ///
    /// # Errors
    /// [`ResolveError::TickerNotFound`] when no tier holds a point and the
    /// provider cannot supply one; [`ResolveError::Store`] when the warm store
    /// fails while it is the only remaining source.
    pub async fn get_current(&self, ticker: &Ticker) -> Result<PricePoint, ResolveError> {
        let key = current_price_key(ticker);
        if let Some(point) = self.tiers.hot.get(&key).await {
            tracing::debug!(%ticker, source = "hot", "price resolved");
            return Ok(point.with_source(PriceSource::Hot));
        }

        let now = UtcDateTime::now();
        match self.tiers.warm.latest(ticker).await {
            Ok(Some(point)) if point.is_fresh(now, self.config.max_age) => {
                self.tiers
                    .hot
                    .set(key, point.clone(), Some(self.config.hot_ttl))
                    .await;
                tracing::debug!(%ticker, source = "warm", "price resolved");
                return Ok(point);
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%ticker, %error, "warm store lookup failed"),
        }

        self.resolve_miss(ticker).await
    }

    /// Price at `at`, or the nearest stored one before it.
    ///
    /// Instants at or after now are served by [`Self::get_current`]; anything
    /// strictly in the past is answered from the warm store alone.
    pub async fn get_at(&self, ticker: &Ticker, at: UtcDateTime) -> Result<PricePoint, ResolveError> {
        if at >= UtcDateTime::now() {
            return self.get_current(ticker).await;
        }

        let floor = at.saturating_sub(self.config.history_lookback);
        self.tiers
            .warm
            .at(ticker, at, Some(floor))
            .await?
            .ok_or_else(|| ResolveError::DataUnavailable {
                ticker: ticker.clone(),
                at,
            })
    }

    /// One ascending page of `[start, end]` strictly after `after`.
    pub async fn range_page(
        &self,
        ticker: &Ticker,
        start: UtcDateTime,
        end: UtcDateTime,
        after: Option<UtcDateTime>,
    ) -> Result<RangePage, ResolveError> {
        if start > end {
            return Err(ResolveError::InvalidRange { start, end });
        }

        let limit = self.config.page_size.max(1);
        let points = self
            .tiers
            .warm
            .range(
                ticker,
                RangeQuery {
                    start,
                    end,
                    after,
                    limit,
                },
            )
            .await?;
        let next_after = if points.len() == limit {
            points.last().map(PricePoint::timestamp)
        } else {
            None
        };

        Ok(RangePage { points, next_after })
    }

    /// Every stored point in `[start, end]`, ascending, capped at
    /// `max_range_points`.
    pub async fn get_range(
        &self,
        ticker: &Ticker,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Vec<PricePoint>, ResolveError> {
        let cap = self.config.max_range_points;
        let mut points = Vec::new();
        let mut after = None;

        while points.len() < cap {
            let page = self.range_page(ticker, start, end, after).await?;
            points.extend(page.points);
            match page.next_after {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        if points.len() > cap {
            tracing::debug!(%ticker, cap, "range truncated");
            points.truncate(cap);
        }
        Ok(points)
    }

    /// Fetch a historical series through the limiter and store it, seeding
    /// history for [`Self::get_at`] and [`Self::get_range`].
    pub async fn backfill(
        &self,
        ticker: &Ticker,
        interval: Interval,
    ) -> Result<BackfillOutcome, ResolveError> {
        let permit = self.tiers.limiter.try_acquire();
        if !permit.granted {
            return Ok(BackfillOutcome::Deferred {
                retry_after_ms: u64::try_from(permit.retry_after.as_millis()).unwrap_or(u64::MAX),
            });
        }

        let series = tokio::time::timeout(
            self.config.upstream_timeout,
            self.tiers.upstream.fetch_series(ticker, interval),
        )
        .await
        .map_err(|_| UpstreamError::unavailable("series request timed out"))??;

        let mut points = series;
        points.sort_by_key(PricePoint::timestamp);
        points.dedup_by_key(|point| point.timestamp());

        let batch_id = format!("backfill-{}", uuid::Uuid::new_v4());
        let rows = self.tiers.warm.upsert_batch(&batch_id, &points).await?;
        tracing::info!(%ticker, %interval, rows, %batch_id, "series backfilled");

        Ok(BackfillOutcome::Stored { batch_id, rows })
    }

    async fn resolve_miss(&self, ticker: &Ticker) -> Result<PricePoint, ResolveError> {
        let key = current_price_key(ticker);
        if let Some(point) = self.tiers.hot.get(&key).await {
            return Ok(point.with_source(PriceSource::Hot));
        }
        if self.known_unknown(ticker) {
            return Err(ResolveError::TickerNotFound {
                ticker: ticker.clone(),
                reason: NotFoundReason::RejectedByProvider,
            });
        }

        let fetched = self
            .tiers
            .fetch_once(ticker, || self.fetch_and_store(ticker))
            .await;
        match fetched {
            Fetched::Point(point) => {
                tracing::info!(%ticker, source = "upstream", price = %point.price(), "price resolved");
                Ok(point)
            }
            Fetched::Denied { retry_after } => {
                tracing::info!(
                    %ticker,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "quota exhausted, serving stored data"
                );
                self.fallback(ticker, NotFoundReason::QuotaExhausted).await
            }
            Fetched::TimedOut => {
                tracing::warn!(
                    %ticker,
                    timeout_ms = u64::try_from(self.config.upstream_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "upstream call timed out"
                );
                self.fallback(ticker, NotFoundReason::ProviderUnavailable).await
            }
            Fetched::Failed(error) => {
                tracing::warn!(%ticker, %error, "upstream call failed");
                let reason = match error.kind() {
                    UpstreamErrorKind::NotFound => NotFoundReason::RejectedByProvider,
                    UpstreamErrorKind::RateLimited => NotFoundReason::QuotaExhausted,
                    UpstreamErrorKind::Unavailable | UpstreamErrorKind::InvalidResponse => {
                        NotFoundReason::ProviderUnavailable
                    }
                };
                self.fallback(ticker, reason).await
            }
        }
    }

    /// Leader side of a shared fetch: the point is written back through both
    /// tiers before joined callers see it.
    async fn fetch_and_store(&self, ticker: &Ticker) -> Fetched {
        let fetched = self.fetch_upstream(ticker).await;
        if let Fetched::Point(point) = &fetched {
            if let Err(error) = self.tiers.warm.upsert(point).await {
                tracing::warn!(%ticker, %error, "warm store write-back failed");
            }
            self.tiers
                .hot
                .set(current_price_key(ticker), point.clone(), Some(self.config.hot_ttl))
                .await;
        }
        fetched
    }

    /// Limiter-gated fetch; transient failures are retried with backoff and
    /// every attempt needs its own grant.
    async fn fetch_upstream(&self, ticker: &Ticker) -> Fetched {
        let retry = self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for_attempt(attempt - 1)).await;
            }

            let permit = self.tiers.limiter.try_acquire();
            if !permit.granted {
                return match last_error {
                    Some(error) => Fetched::Failed(error),
                    None => Fetched::Denied {
                        retry_after: permit.retry_after,
                    },
                };
            }

            let call = self.tiers.upstream.fetch_current(ticker);
            match tokio::time::timeout(self.config.upstream_timeout, call).await {
                Ok(Ok(point)) => {
                    self.forget_unknown(ticker);
                    return Fetched::Point(point);
                }
                Ok(Err(error)) if error.retryable() => {
                    tracing::debug!(%ticker, attempt, %error, "transient upstream failure");
                    last_error = Some(error);
                }
                Ok(Err(error)) => return Fetched::Failed(error),
                Err(_) => return Fetched::TimedOut,
            }
        }

        Fetched::Failed(
            last_error.unwrap_or_else(|| UpstreamError::unavailable("no upstream attempt made")),
        )
    }

    /// Newest stored point at any age, flagged stale.
    async fn fallback(
        &self,
        ticker: &Ticker,
        reason: NotFoundReason,
    ) -> Result<PricePoint, ResolveError> {
        if let Some(point) = self.tiers.warm.latest(ticker).await? {
            tracing::debug!(%ticker, source = "warm", stale = true, "price resolved");
            return Ok(point.into_stale());
        }

        if reason == NotFoundReason::RejectedByProvider {
            self.remember_unknown(ticker);
        }
        Err(ResolveError::TickerNotFound {
            ticker: ticker.clone(),
            reason,
        })
    }

    fn unknown(&self) -> MutexGuard<'_, HashMap<Ticker, Instant>> {
        self.unknown.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("unknown-ticker cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn known_unknown(&self, ticker: &Ticker) -> bool {
        let mut unknown = self.unknown();
        match unknown.get(ticker) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                unknown.remove(ticker);
                false
            }
            None => false,
        }
    }

    fn remember_unknown(&self, ticker: &Ticker) {
        if self.config.not_found_ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut unknown = self.unknown();
        unknown.retain(|_, expires_at| *expires_at > now);
        unknown.insert(ticker.clone(), now + self.config.not_found_ttl);
    }

    fn forget_unknown(&self, ticker: &Ticker) {
        self.unknown().remove(ticker);
    }
}

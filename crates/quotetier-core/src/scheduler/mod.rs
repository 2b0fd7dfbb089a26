//! Background refresh of the active ticker set.
//!
//! A run walks [`WatchlistTracker::active_set`] in fixed-size batches,
//! skipping tickers that are still fresh and fetching the rest through the
//! shared [`RateLimiter`](crate::RateLimiter). Each batch is committed to the
//! warm store on its own, so an interrupted run keeps earlier batches.

mod cron;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::current_price_key;
use crate::domain::{PricePoint, Ticker, UtcDateTime};
use crate::resolver::{Fetched, Tiers};
use crate::upstream::UpstreamErrorKind;
use crate::watchlist::WatchlistTracker;

pub use cron::{CronError, CronSchedule};

const SECONDS_PER_HOUR: u64 = 3_600;

/// Refresh job settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// A disabled scheduler skips every trigger.
    pub enabled: bool,
    pub cron_expression: String,
    /// Tickers fetched per batch; each batch is one warm-store commit.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay_seconds: u64,
    /// Trading recency that keeps a ticker in the active set.
    pub active_window_days: u32,
    /// Points younger than this are not refetched.
    pub max_age_hours: u64,
    /// Must be 1.
    pub max_concurrent_instances: usize,
    /// Consecutive provider outages that pause the rest of a run.
    pub outage_threshold: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron_expression: String::from("*/15 * * * *"),
            batch_size: 5,
            batch_delay_seconds: 12,
            active_window_days: 30,
            max_age_hours: 1,
            max_concurrent_instances: 1,
            outage_threshold: 3,
        }
    }
}

impl RefreshConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(SECONDS_PER_HOUR))
    }

    pub fn schedule(&self) -> Result<CronSchedule, CronError> {
        CronSchedule::parse(&self.cron_expression)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error(transparent)]
    InvalidCron(#[from] CronError),

    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error("max_concurrent_instances must be 1, got {0}")]
    UnsupportedConcurrency(usize),

    #[error("scheduler is disabled")]
    Disabled,
}

/// Lifecycle of the current (or last) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Enumerating,
    Batching,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    AlreadyRunning,
}

/// Per-run counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub batches: usize,
    pub succeeded: usize,
    pub skipped_fresh: usize,
    /// Denied by the limiter or the provider's quota; retried next run.
    pub deferred: usize,
    pub failed: usize,
    /// The run stopped early after consecutive provider outages.
    pub paused: bool,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: UtcDateTime) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            batches: 0,
            succeeded: 0,
            skipped_fresh: 0,
            deferred: 0,
            failed: 0,
            paused: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunSummary),
    /// A batch commit failed; the summary covers the batches before it.
    Failed { summary: RunSummary, error: String },
    Skipped { reason: SkipReason },
}

enum TickerOutcome {
    Fresh,
    Fetched(PricePoint),
    Deferred,
    Failed(UpstreamErrorKind),
}

struct SchedulerInner {
    tiers: Tiers,
    watchlist: WatchlistTracker,
    config: RefreshConfig,
    upstream_timeout: Duration,
    hot_ttl: Duration,
    schedule: CronSchedule,
    runs: Semaphore,
    state: Mutex<SchedulerState>,
}

/// Timer-driven refresh job. Cloning shares the same instance.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

/// Handle on the spawned timer task.
pub struct SchedulerHandle {
    /// Outcome of every run the timer triggered; skipped triggers are not sent.
    pub summaries: mpsc::Receiver<RunOutcome>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the timer once any in-progress run has finished.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "refresh timer task ended abnormally");
        }
    }
}

impl RefreshScheduler {
    /// `upstream_timeout` and `hot_ttl` follow the resolver's settings so both
    /// paths write identical cache entries.
    pub fn new(
        tiers: Tiers,
        watchlist: WatchlistTracker,
        config: RefreshConfig,
        upstream_timeout: Duration,
        hot_ttl: Duration,
    ) -> Result<Self, SchedulerError> {
        if config.batch_size == 0 {
            return Err(SchedulerError::ZeroBatchSize);
        }
        if config.max_concurrent_instances != 1 {
            return Err(SchedulerError::UnsupportedConcurrency(
                config.max_concurrent_instances,
            ));
        }
        let schedule = config.schedule()?;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                tiers,
                watchlist,
                runs: Semaphore::new(config.max_concurrent_instances),
                config,
                upstream_timeout,
                hot_ttl,
                schedule,
                state: Mutex::new(SchedulerState::Idle),
            }),
        })
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        *self.lock_state()
    }

    /// Spawn the timer task firing [`Self::run`] on the cron schedule.
    pub fn start(&self) -> Result<SchedulerHandle, SchedulerError> {
        if !self.inner.config.enabled {
            return Err(SchedulerError::Disabled);
        }

        let (summaries_tx, summaries_rx) = mpsc::channel(16);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let schedule = &scheduler.inner.schedule;
            tracing::info!(cron = %schedule, "refresh timer started");
            let mut last_fired: Option<UtcDateTime> = None;
            loop {
                let now = UtcDateTime::now();
                // A timer waking just before the wall-clock boundary must not
                // fire the same slot twice.
                let from = last_fired.map_or(now, |fired| fired.max(now));
                let Some(next) = schedule.next_after(from) else {
                    tracing::warn!(cron = %schedule, "cron expression never fires again");
                    break;
                };

                tokio::select! {
                    () = tokio::time::sleep(next.duration_since(now)) => {}
                    _ = shutdown_rx.changed() => break,
                }
                last_fired = Some(next);

                match scheduler.run().await {
                    RunOutcome::Skipped { reason } => {
                        tracing::debug!(?reason, "refresh trigger skipped");
                    }
                    outcome => {
                        if summaries_tx.try_send(outcome).is_err() {
                            tracing::debug!("run summary dropped; receiver full or closed");
                        }
                    }
                }
            }
            tracing::info!("refresh timer stopped");
        });

        Ok(SchedulerHandle {
            summaries: summaries_rx,
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Execute one refresh run now. A trigger arriving while another run is
    /// active is dropped.
    pub async fn run(&self) -> RunOutcome {
        if !self.inner.config.enabled {
            return RunOutcome::Skipped {
                reason: SkipReason::Disabled,
            };
        }
        let Ok(_permit) = self.inner.runs.try_acquire() else {
            tracing::debug!("refresh already running");
            return RunOutcome::Skipped {
                reason: SkipReason::AlreadyRunning,
            };
        };

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("refresh_run", %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> RunOutcome {
        let config = &self.inner.config;
        let started_at = UtcDateTime::now();
        let mut summary = RunSummary::new(run_id, started_at);

        self.set_state(SchedulerState::Enumerating);
        let tickers = self
            .inner
            .watchlist
            .active_set(started_at)
            .await
            .into_iter()
            .collect::<Vec<_>>();
        tracing::info!(
            tickers = tickers.len(),
            batch_size = config.batch_size,
            "refresh run started"
        );

        self.set_state(SchedulerState::Batching);
        let mut consecutive_outages = 0u32;

        for (index, batch) in tickers.chunks(config.batch_size).enumerate() {
            if index > 0 && !config.batch_delay().is_zero() {
                tokio::time::sleep(config.batch_delay()).await;
            }
            summary.batches += 1;

            let mut fetched = Vec::with_capacity(batch.len());
            for ticker in batch {
                match self.refresh_one(ticker).await {
                    TickerOutcome::Fresh => summary.skipped_fresh += 1,
                    TickerOutcome::Deferred => summary.deferred += 1,
                    TickerOutcome::Fetched(point) => {
                        consecutive_outages = 0;
                        fetched.push(point);
                    }
                    TickerOutcome::Failed(kind) => {
                        summary.failed += 1;
                        if kind == UpstreamErrorKind::Unavailable {
                            consecutive_outages += 1;
                        } else {
                            consecutive_outages = 0;
                        }
                    }
                }

                if consecutive_outages >= config.outage_threshold.max(1) {
                    summary.paused = true;
                    break;
                }
            }

            let batch_id = format!("{run_id}-{index:04}");
            if let Err(error) = self.commit(&batch_id, fetched, &mut summary).await {
                tracing::error!(%batch_id, %error, "batch commit failed, aborting run");
                summary.finished_at = UtcDateTime::now();
                self.set_state(SchedulerState::Failed);
                self.set_state(SchedulerState::Idle);
                return RunOutcome::Failed {
                    summary,
                    error: error.to_string(),
                };
            }

            if summary.paused {
                tracing::warn!(
                    consecutive_outages,
                    remaining = tickers.len().saturating_sub((index + 1) * config.batch_size),
                    "provider outage, pausing run"
                );
                break;
            }
        }

        summary.finished_at = UtcDateTime::now();
        self.set_state(SchedulerState::Completed);
        tracing::info!(
            batches = summary.batches,
            succeeded = summary.succeeded,
            skipped_fresh = summary.skipped_fresh,
            deferred = summary.deferred,
            failed = summary.failed,
            paused = summary.paused,
            "refresh run finished"
        );
        RunOutcome::Completed(summary)
    }

    async fn refresh_one(&self, ticker: &Ticker) -> TickerOutcome {
        let tiers = &self.inner.tiers;
        let key = current_price_key(ticker);
        if tiers.hot.get(&key).await.is_some() {
            return TickerOutcome::Fresh;
        }
        match tiers.warm.latest(ticker).await {
            Ok(Some(point)) if point.is_fresh(UtcDateTime::now(), self.inner.config.max_age()) => {
                return TickerOutcome::Fresh;
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%ticker, %error, "warm store lookup failed"),
        }

        let fetched = tiers
            .fetch_once(ticker, || self.fetch_gated(ticker))
            .await;
        match fetched {
            Fetched::Point(point) => TickerOutcome::Fetched(point),
            Fetched::Denied { .. } => {
                tracing::debug!(%ticker, "quota denied, deferring to next run");
                TickerOutcome::Deferred
            }
            Fetched::Failed(error) if error.kind() == UpstreamErrorKind::RateLimited => {
                tracing::debug!(%ticker, %error, "provider quota hit, deferring");
                TickerOutcome::Deferred
            }
            Fetched::Failed(error) => {
                tracing::warn!(%ticker, %error, "refresh fetch failed");
                TickerOutcome::Failed(error.kind())
            }
            Fetched::TimedOut => {
                tracing::warn!(%ticker, "refresh fetch timed out");
                TickerOutcome::Failed(UpstreamErrorKind::Unavailable)
            }
        }
    }

    /// A single limiter-gated attempt; the run's batch commit stores the point.
    async fn fetch_gated(&self, ticker: &Ticker) -> Fetched {
        let tiers = &self.inner.tiers;
        let permit = tiers.limiter.try_acquire();
        if !permit.granted {
            return Fetched::Denied {
                retry_after: permit.retry_after,
            };
        }

        let call = tiers.upstream.fetch_current(ticker);
        match tokio::time::timeout(self.inner.upstream_timeout, call).await {
            Ok(Ok(point)) => Fetched::Point(point),
            Ok(Err(error)) => Fetched::Failed(error),
            Err(_) => Fetched::TimedOut,
        }
    }

    /// Persist one batch: a single warm commit, then the hot cache.
    async fn commit(
        &self,
        batch_id: &str,
        mut points: Vec<PricePoint>,
        summary: &mut RunSummary,
    ) -> Result<(), crate::warm_store::WarmStoreError> {
        if points.is_empty() {
            return Ok(());
        }
        points.sort_by(|a, b| (a.ticker(), a.timestamp()).cmp(&(b.ticker(), b.timestamp())));
        points.dedup_by(|a, b| a.ticker() == b.ticker() && a.timestamp() == b.timestamp());

        let tiers = &self.inner.tiers;
        let rows = tiers.warm.upsert_batch(batch_id, &points).await?;
        for point in points {
            let key = current_price_key(point.ticker());
            // A read may have cached a newer point while the batch was fetched.
            if let Some(cached) = tiers.hot.get(&key).await {
                if cached.timestamp() > point.timestamp() {
                    tracing::trace!(ticker = %point.ticker(), "hot entry newer than batch point");
                    continue;
                }
            }
            tiers.hot.set(key, point, Some(self.inner.hot_ttl)).await;
        }
        summary.succeeded += rows;
        tracing::debug!(batch_id, rows, "batch committed");
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("scheduler state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_state(&self, next: SchedulerState) {
        let mut state = self.lock_state();
        tracing::trace!(from = ?*state, to = ?next, "scheduler state");
        *state = next;
    }
}

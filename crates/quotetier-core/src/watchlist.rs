//! Active-ticker set: explicit pins plus recent trading activity.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::{Ticker, UtcDateTime};

const SECONDS_PER_DAY: u64 = 86_400;

/// Inclusion policy for the active set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchlistConfig {
    /// Tickers traded within this many days stay active.
    pub active_window_days: u32,
    /// Tickers pinned at startup.
    pub pinned: Vec<String>,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            active_window_days: 30,
            pinned: Vec::new(),
        }
    }
}

impl WatchlistConfig {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.active_window_days) * SECONDS_PER_DAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchlistEntry {
    pub ticker: Ticker,
    /// Last trade (or watch) instant.
    pub last_active: UtcDateTime,
    /// Explicitly watched rather than derived from trading.
    pub pinned: bool,
}

/// Tracks watched and recently traded tickers.
///
/// Writers are the surrounding trading and watch use cases; the refresh job
/// only reads [`WatchlistTracker::active_set`].
#[derive(Debug, Clone)]
pub struct WatchlistTracker {
    entries: Arc<RwLock<HashMap<Ticker, WatchlistEntry>>>,
    active_window: Duration,
}

impl WatchlistTracker {
    pub fn new(active_window: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            active_window,
        }
    }

    pub async fn from_config(config: &WatchlistConfig) -> Result<Self, crate::ValidationError> {
        let tracker = Self::new(config.active_window());
        for raw in &config.pinned {
            tracker.watch(Ticker::parse(raw)?, UtcDateTime::now()).await;
        }
        Ok(tracker)
    }

    pub fn active_window(&self) -> Duration {
        self.active_window
    }

    /// Pin `ticker` so it stays active regardless of trading.
    pub async fn watch(&self, ticker: Ticker, at: UtcDateTime) {
        let mut entries = self.entries.write().await;
        entries
            .entry(ticker.clone())
            .and_modify(|entry| entry.pinned = true)
            .or_insert(WatchlistEntry {
                ticker,
                last_active: at,
                pinned: true,
            });
    }

    /// Remove the pin; the entry remains while recent trades keep it active.
    pub async fn unwatch(&self, ticker: &Ticker) {
        if let Some(entry) = self.entries.write().await.get_mut(ticker) {
            entry.pinned = false;
        }
    }

    /// Record a trade; creates the entry on first trade.
    pub async fn record_trade(&self, ticker: Ticker, at: UtcDateTime) {
        let mut entries = self.entries.write().await;
        entries
            .entry(ticker.clone())
            .and_modify(|entry| entry.last_active = entry.last_active.max(at))
            .or_insert(WatchlistEntry {
                ticker,
                last_active: at,
                pinned: false,
            });
    }

    /// Pinned tickers plus tickers active within the window ending at `now`.
    pub async fn active_set(&self, now: UtcDateTime) -> BTreeSet<Ticker> {
        let cutoff = now.saturating_sub(self.active_window);
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.pinned || entry.last_active >= cutoff)
            .map(|entry| entry.ticker.clone())
            .collect()
    }

    /// Unpinned entries idle for longer than `window`; input to an external
    /// retirement policy.
    pub async fn inactive(&self, now: UtcDateTime, window: Duration) -> Vec<Ticker> {
        let cutoff = now.saturating_sub(window);
        let mut idle = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.pinned && entry.last_active < cutoff)
            .map(|entry| entry.ticker.clone())
            .collect::<Vec<_>>();
        idle.sort();
        idle
    }

    pub async fn retire(&self, ticker: &Ticker) -> bool {
        self.entries.write().await.remove(ticker).is_some()
    }

    /// Snapshot of every entry, ordered by ticker.
    pub async fn entries(&self) -> Vec<WatchlistEntry> {
        let mut entries = self.entries.read().await.values().cloned().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        entries
    }
}

//! Warm tier: durable price observations keyed by `(ticker, timestamp)`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use quotetier_warehouse::{PriceRecord, RangeBounds, Warehouse, WarehouseError};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::{
    Currency, Interval, Money, Ohlcv, PricePoint, PriceSource, Ticker, UtcDateTime,
};

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, WarmStoreError>> + Send + 'a>>;

/// Errors raised by a [`WarmStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarmStoreError {
    #[error("warehouse error: {0}")]
    Warehouse(String),

    #[error("stored row for '{ticker}' is corrupt: {reason}")]
    Corrupt { ticker: String, reason: String },

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<WarehouseError> for WarmStoreError {
    fn from(value: WarehouseError) -> Self {
        Self::Warehouse(value.to_string())
    }
}

/// Bounds of one range page. `start` and `end` are inclusive; `after` is an
/// exclusive cursor the caller carries between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: UtcDateTime,
    pub end: UtcDateTime,
    pub after: Option<UtcDateTime>,
    pub limit: usize,
}

/// Durable tier contract. Every point returned carries `source = warm`.
pub trait WarmStore: Send + Sync {
    /// Insert or replace the observation at `(ticker, timestamp)`.
    fn upsert<'a>(&'a self, point: &'a PricePoint) -> StoreFuture<'a, ()>;

    /// Upsert `points` as one commit tagged with `batch_id`; all or nothing.
    fn upsert_batch<'a>(&'a self, batch_id: &'a str, points: &'a [PricePoint]) -> StoreFuture<'a, usize>;

    fn latest<'a>(&'a self, ticker: &'a Ticker) -> StoreFuture<'a, Option<PricePoint>>;

    /// Observation at `at` or the nearest one before it, ignoring anything
    /// older than `not_before`.
    fn at<'a>(
        &'a self,
        ticker: &'a Ticker,
        at: UtcDateTime,
        not_before: Option<UtcDateTime>,
    ) -> StoreFuture<'a, Option<PricePoint>>;

    /// Ascending observations within `query`.
    fn range<'a>(&'a self, ticker: &'a Ticker, query: RangeQuery) -> StoreFuture<'a, Vec<PricePoint>>;
}

/// In-process [`WarmStore`] for embedded use and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarmStore {
    points: Arc<RwLock<BTreeMap<(Ticker, i64), PricePoint>>>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

fn stored(point: &PricePoint) -> PricePoint {
    PricePoint::clone(point).with_source(PriceSource::Warm)
}

impl WarmStore for MemoryWarmStore {
    fn upsert<'a>(&'a self, point: &'a PricePoint) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let key = (point.ticker().clone(), point.timestamp().unix_micros());
            self.points.write().await.insert(key, stored(point));
            Ok(())
        })
    }

    fn upsert_batch<'a>(&'a self, batch_id: &'a str, points: &'a [PricePoint]) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut map = self.points.write().await;
            for point in points {
                let key = (point.ticker().clone(), point.timestamp().unix_micros());
                map.insert(key, stored(point));
            }
            tracing::debug!(batch_id, rows = points.len(), "memory warm store committed batch");
            Ok(points.len())
        })
    }

    fn latest<'a>(&'a self, ticker: &'a Ticker) -> StoreFuture<'a, Option<PricePoint>> {
        Box::pin(async move {
            let map = self.points.read().await;
            let found = map
                .range((ticker.clone(), i64::MIN)..=(ticker.clone(), i64::MAX))
                .next_back()
                .map(|(_, point)| point.clone());
            Ok(found)
        })
    }

    fn at<'a>(
        &'a self,
        ticker: &'a Ticker,
        at: UtcDateTime,
        not_before: Option<UtcDateTime>,
    ) -> StoreFuture<'a, Option<PricePoint>> {
        Box::pin(async move {
            let floor = not_before.map_or(i64::MIN, UtcDateTime::unix_micros);
            let ceiling = at.unix_micros();
            if floor > ceiling {
                return Ok(None);
            }
            let map = self.points.read().await;
            let found = map
                .range((ticker.clone(), floor)..=(ticker.clone(), ceiling))
                .next_back()
                .map(|(_, point)| point.clone());
            Ok(found)
        })
    }

    fn range<'a>(&'a self, ticker: &'a Ticker, query: RangeQuery) -> StoreFuture<'a, Vec<PricePoint>> {
        Box::pin(async move {
            let start = query.start.unix_micros();
            let end = query.end.unix_micros();
            let lower = match query.after.map(UtcDateTime::unix_micros) {
                Some(after) if after >= start => after.saturating_add(1),
                _ => start,
            };
            if query.limit == 0 || lower > end {
                return Ok(Vec::new());
            }
            let map = self.points.read().await;
            Ok(map
                .range((ticker.clone(), lower)..=(ticker.clone(), end))
                .take(query.limit)
                .map(|(_, point)| point.clone())
                .collect())
        })
    }
}

/// [`WarmStore`] backed by the `DuckDB` warehouse.
///
/// Warehouse calls are synchronous and run on the blocking pool.
#[derive(Clone)]
pub struct DuckDbWarmStore {
    warehouse: Warehouse,
}

impl DuckDbWarmStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, WarmStoreError>
    where
        T: Send + 'static,
        F: FnOnce(Warehouse) -> Result<T, WarehouseError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || work(warehouse))
            .await
            .map_err(|e| WarmStoreError::Task(e.to_string()))?
            .map_err(WarmStoreError::from)
    }
}

impl WarmStore for DuckDbWarmStore {
    fn upsert<'a>(&'a self, point: &'a PricePoint) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let record = to_record(point);
            let batch_id = format!("single-{}", uuid::Uuid::new_v4());
            self.blocking(move |warehouse| warehouse.upsert_prices(&batch_id, &[record]))
                .await
                .map(|_| ())
        })
    }

    fn upsert_batch<'a>(&'a self, batch_id: &'a str, points: &'a [PricePoint]) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let records = points.iter().map(to_record).collect::<Vec<_>>();
            let batch_id = batch_id.to_owned();
            self.blocking(move |warehouse| warehouse.upsert_prices(&batch_id, &records))
                .await
        })
    }

    fn latest<'a>(&'a self, ticker: &'a Ticker) -> StoreFuture<'a, Option<PricePoint>> {
        Box::pin(async move {
            let key = ticker.as_str().to_owned();
            let record = self
                .blocking(move |warehouse| warehouse.latest_price(&key))
                .await?;
            record.map(from_record).transpose()
        })
    }

    fn at<'a>(
        &'a self,
        ticker: &'a Ticker,
        at: UtcDateTime,
        not_before: Option<UtcDateTime>,
    ) -> StoreFuture<'a, Option<PricePoint>> {
        Box::pin(async move {
            let key = ticker.as_str().to_owned();
            let ts_us = at.unix_micros();
            let floor = not_before.map(UtcDateTime::unix_micros);
            let record = self
                .blocking(move |warehouse| warehouse.price_at_or_before(&key, ts_us, floor))
                .await?;
            record.map(from_record).transpose()
        })
    }

    fn range<'a>(&'a self, ticker: &'a Ticker, query: RangeQuery) -> StoreFuture<'a, Vec<PricePoint>> {
        Box::pin(async move {
            let key = ticker.as_str().to_owned();
            let bounds = RangeBounds {
                start_us: query.start.unix_micros(),
                end_us: query.end.unix_micros(),
                after_us: query.after.map(UtcDateTime::unix_micros),
                limit: query.limit,
            };
            let records = self
                .blocking(move |warehouse| warehouse.price_range(&key, bounds))
                .await?;
            records.into_iter().map(from_record).collect()
        })
    }
}

fn to_record(point: &PricePoint) -> PriceRecord {
    let bar = point.ohlcv();
    PriceRecord {
        ticker: point.ticker().as_str().to_owned(),
        ts_us: point.timestamp().unix_micros(),
        interval: point.interval().as_str().to_owned(),
        price: point.price().amount().to_string(),
        currency: point.price().currency().as_str().to_owned(),
        open: bar.map(|bar| bar.open.to_string()),
        high: bar.map(|bar| bar.high.to_string()),
        low: bar.map(|bar| bar.low.to_string()),
        close: bar.map(|bar| bar.close.to_string()),
        volume: bar
            .and_then(|bar| bar.volume)
            .and_then(|volume| i64::try_from(volume).ok()),
        source: point.source().as_str().to_owned(),
    }
}

fn from_record(record: PriceRecord) -> Result<PricePoint, WarmStoreError> {
    let corrupt = |reason: String| WarmStoreError::Corrupt {
        ticker: record.ticker.clone(),
        reason,
    };

    let ticker = Ticker::parse(&record.ticker).map_err(|e| corrupt(e.to_string()))?;
    let currency = Currency::parse(&record.currency).map_err(|e| corrupt(e.to_string()))?;
    let price = Money::parse(&record.price, currency).map_err(|e| corrupt(e.to_string()))?;
    let timestamp = UtcDateTime::from_unix_micros(record.ts_us).map_err(|e| corrupt(e.to_string()))?;
    let interval = Interval::from_str(&record.interval).map_err(|e| corrupt(e.to_string()))?;

    let bar = match (&record.open, &record.high, &record.low, &record.close) {
        (Some(open), Some(high), Some(low), Some(close)) => {
            let parse = |raw: &str| {
                Decimal::from_str(raw.trim()).map_err(|_| corrupt(format!("invalid decimal '{raw}'")))
            };
            let volume = record.volume.and_then(|volume| u64::try_from(volume).ok());
            Some(
                Ohlcv::new(parse(open)?, parse(high)?, parse(low)?, parse(close)?, volume)
                    .map_err(|e| corrupt(e.to_string()))?,
            )
        }
        _ => None,
    };

    // Rows were validated against the clock when written.
    let now = UtcDateTime::now().max(timestamp);
    let point = PricePoint::new(ticker, price, timestamp, PriceSource::Warm, interval, now)
        .map_err(|e| corrupt(e.to_string()))?;
    Ok(match bar {
        Some(bar) => point.with_ohlcv(bar),
        None => point,
    })
}

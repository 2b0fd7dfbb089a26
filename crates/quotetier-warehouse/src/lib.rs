//! # Quotetier Warehouse
//!
//! DuckDB-backed durable storage for price observations: the warm tier of the
//! quotetier retrieval engine.
//!
//! Observations are keyed by `(ticker, ts_us)` where `ts_us` is the UTC
//! instant in unix microseconds, so every write is an idempotent upsert and
//! writers for different tickers never touch the same row. Prices are stored as
//! `DECIMAL(38, 10)` and cross this boundary as decimal strings; nothing in
//! this crate converts a price to floating point.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `price_points` | Price observations keyed by ticker and instant |
//! | `ingest_log` | One row per committed observation, tagged with its batch |
//! | `schema_migrations` | Applied migration versions |
//!
//! ## Example
//!
//! ```rust,no_run
//! use quotetier_warehouse::{PriceRecord, Warehouse};
//!
//! let warehouse = Warehouse::open_default()?;
//! warehouse.upsert_prices("manual-001", &[PriceRecord {
//!     ticker: "AAPL".to_string(),
//!     ts_us: 1_704_067_200_000_000,
//!     interval: "1day".to_string(),
//!     price: "185.64".to_string(),
//!     currency: "USD".to_string(),
//!     open: None, high: None, low: None, close: None, volume: None,
//!     source: "upstream".to_string(),
//! }])?;
//! let latest = warehouse.latest_price("AAPL")?;
//! # Ok::<(), quotetier_warehouse::WarehouseError>(())
//! ```

pub mod duckdb;
pub mod migrations;
pub mod query;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection, Row, ToSql};
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use query::{QueryGuardrails, QueryResult, SqlColumn};

const PRICE_COLUMNS: &str = "ticker, ts_us, interval, CAST(price AS VARCHAR), currency, \
     CAST(open AS VARCHAR), CAST(high AS VARCHAR), CAST(low AS VARCHAR), \
     CAST(close AS VARCHAR), volume, source";

/// Errors raised by warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },
}

/// Location and pool sizing of the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for quotetier data.
    pub home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle pooled connections.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let home = resolve_home();
        let db_path = home.join("warehouse.duckdb");
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    /// Config rooted at `home`, with the database file inside it.
    pub fn in_dir(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let db_path = home.join("warehouse.duckdb");
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Storage shape of one price observation.
///
/// Decimal fields are carried as strings so precision is preserved end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    pub ticker: String,
    /// Observation instant in unix microseconds (UTC).
    pub ts_us: i64,
    pub interval: String,
    pub price: String,
    pub currency: String,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
    pub volume: Option<i64>,
    /// Tier or adapter that produced the observation.
    pub source: String,
}

/// Bounds of a paginated range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBounds {
    /// Inclusive lower bound (unix microseconds).
    pub start_us: i64,
    /// Inclusive upper bound (unix microseconds).
    pub end_us: i64,
    /// Exclusive cursor: only rows strictly after this instant are returned.
    pub after_us: Option<i64>,
    pub limit: usize,
}

/// DuckDB warm store.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn home(&self) -> &Path {
        self.config.home.as_path()
    }

    /// Upsert `rows` in one transaction and log each row under `batch_id`.
    ///
    /// Either every row of the batch is committed or none is. Returns the
    /// number of rows written.
    pub fn upsert_prices(&self, batch_id: &str, rows: &[PriceRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let values: [&dyn ToSql; 11] = [
                    &row.ticker,
                    &row.ts_us,
                    &row.interval,
                    &row.price,
                    &row.currency,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &row.source,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO price_points \
                     (ticker, ts_us, interval, price, currency, open, high, low, close, volume, source, updated_at) \
                     VALUES (?, ?, ?, CAST(? AS DECIMAL(38, 10)), ?, \
                             CAST(? AS DECIMAL(38, 10)), CAST(? AS DECIMAL(38, 10)), \
                             CAST(? AS DECIMAL(38, 10)), CAST(? AS DECIMAL(38, 10)), \
                             ?, ?, CURRENT_TIMESTAMP)",
                    values.as_slice(),
                )?;

                connection.execute(
                    "INSERT INTO ingest_log (batch_id, ticker, ts_us, interval, status, logged_at) \
                     VALUES (?, ?, ?, ?, 'ok', CURRENT_TIMESTAMP)",
                    params![batch_id, row.ticker, row.ts_us, row.interval],
                )?;
            }

            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Most recent observation for `ticker`, if any.
    pub fn latest_price(&self, ticker: &str) -> Result<Option<PriceRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT {PRICE_COLUMNS} FROM price_points WHERE ticker = ? ORDER BY ts_us DESC LIMIT 1"
        );
        query_optional(&connection, &sql, params![ticker])
    }

    /// Observation at `ts_us`, or the nearest one before it.
    ///
    /// When `not_before_us` is set, observations older than it are ignored.
    pub fn price_at_or_before(
        &self,
        ticker: &str,
        ts_us: i64,
        not_before_us: Option<i64>,
    ) -> Result<Option<PriceRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let floor = not_before_us.unwrap_or(i64::MIN);
        let sql = format!(
            "SELECT {PRICE_COLUMNS} FROM price_points \
             WHERE ticker = ? AND ts_us <= ? AND ts_us >= ? \
             ORDER BY ts_us DESC LIMIT 1"
        );
        query_optional(&connection, &sql, params![ticker, ts_us, floor])
    }

    /// Observations in `bounds`, ascending by instant, at most `bounds.limit` rows.
    pub fn price_range(
        &self,
        ticker: &str,
        bounds: RangeBounds,
    ) -> Result<Vec<PriceRecord>, WarehouseError> {
        if bounds.limit == 0 || bounds.start_us > bounds.end_us {
            return Ok(Vec::new());
        }

        let connection = self.manager.acquire()?;
        let lower = match bounds.after_us {
            Some(after) if after >= bounds.start_us => after.saturating_add(1),
            _ => bounds.start_us,
        };
        // `limit` is a usize, never caller text.
        let sql = format!(
            "SELECT {PRICE_COLUMNS} FROM price_points \
             WHERE ticker = ? AND ts_us >= ? AND ts_us <= ? \
             ORDER BY ts_us ASC LIMIT {limit}",
            limit = bounds.limit
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map(params![ticker, lower, bounds.end_us], read_price_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WarehouseError::from)
    }

    /// Number of log rows committed under `batch_id`.
    pub fn batch_row_count(&self, batch_id: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM ingest_log WHERE batch_id = ?",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Run ad-hoc SQL under `guardrails`. Only read statements are accepted
    /// unless `allow_write` is set.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
        allow_write: bool,
    ) -> Result<QueryResult, WarehouseError> {
        let connection = self.manager.acquire()?;
        query::run(&connection, sql, guardrails, allow_write)
    }
}

fn query_optional(
    connection: &Connection,
    sql: &str,
    values: &[&dyn ToSql],
) -> Result<Option<PriceRecord>, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let mut rows = statement.query(values)?;
    match rows.next()? {
        Some(row) => Ok(Some(read_price_record(row)?)),
        None => Ok(None),
    }
}

fn read_price_record(row: &Row<'_>) -> Result<PriceRecord, ::duckdb::Error> {
    Ok(PriceRecord {
        ticker: row.get(0)?,
        ts_us: row.get(1)?,
        interval: row.get(2)?,
        price: row.get(3)?,
        currency: row.get(4)?,
        open: row.get(5)?,
        high: row.get(6)?,
        low: row.get(7)?,
        close: row.get(8)?,
        volume: row.get(9)?,
        source: row.get(10)?,
    })
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// `QUOTETIER_HOME`, else `~/.quotetier`, else `./.quotetier`.
fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("QUOTETIER_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".quotetier");
    }

    PathBuf::from(".quotetier")
}

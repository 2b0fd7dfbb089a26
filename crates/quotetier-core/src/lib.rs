//! # Quotetier Core
//!
//! Tiered market-data retrieval: current and historical price queries are
//! resolved across three tiers of increasing latency and cost.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`domain`] | Tickers, money, price points |
//! | [`cache`] | Hot tier: in-memory entries with expiry |
//! | [`warm_store`] | Warm tier: durable observations (memory or `DuckDB`) |
//! | [`upstream`] | Provider contract and the Alpha Vantage adapter |
//! | [`rate_limiter`] | Shared per-minute / per-day quota gate |
//! | [`resolver`] | Read path with single-flight and stale fallback |
//! | [`watchlist`] | Active ticker set |
//! | [`scheduler`] | Cron-driven batch refresh |
//! | [`config`] | Typed configuration loading |
//!
//! ## Architecture
//!
//! ```text
//!  reads ──▶ PriceResolver ──┬──▶ HotCache
//!                            ├──▶ WarmStore
//!                            └──▶ RateLimiter ──▶ UpstreamProvider
//!                                     ▲
//!  cron ──▶ RefreshScheduler ─────────┘ (same limiter, same tiers)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use quotetier_core::{Engine, EngineConfig, Ticker};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::open(&EngineConfig::load(None)?).await?;
//! let point = engine.resolver.get_current(&Ticker::parse("IBM")?).await?;
//! println!("{} {} ({})", point.ticker(), point.price(), point.source());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod rate_limiter;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod single_flight;
pub mod upstream;
pub mod warm_store;
pub mod watchlist;

pub use cache::{current_price_key, CacheEntry, HotCache, MemoryHotCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
pub use config::{ConfigError, EngineConfig, HotCacheConfig, WarehouseSettings};
pub use domain::{
    Currency, Interval, Money, Ohlcv, PricePoint, PriceSource, Ticker, UtcDateTime,
};
pub use engine::{Engine, EngineError};
pub use error::{NotFoundReason, ResolveError, ValidationError};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use quotetier_warehouse::{QueryGuardrails, QueryResult, Warehouse, WarehouseConfig, WarehouseError};
pub use rate_limiter::{LimiterConfig, Permit, RateLimiter, RateLimiterState, WindowState};
pub use resolver::{BackfillOutcome, PriceResolver, RangePage, ResolverConfig, Tiers};
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{
    CronError, CronSchedule, RefreshConfig, RefreshScheduler, RunOutcome, RunSummary,
    SchedulerError, SchedulerHandle, SchedulerState, SkipReason,
};
pub use single_flight::SingleFlight;
pub use upstream::{
    AlphaVantageConfig, AlphaVantageProvider, UpstreamError, UpstreamErrorKind, UpstreamProvider,
};
pub use warm_store::{DuckDbWarmStore, MemoryWarmStore, RangeQuery, WarmStore, WarmStoreError};
pub use watchlist::{WatchlistConfig, WatchlistEntry, WatchlistTracker};

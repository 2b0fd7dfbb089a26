//! Assembly of the tiers, resolver and scheduler from an [`EngineConfig`].

use std::sync::Arc;

use quotetier_warehouse::{Warehouse, WarehouseError};
use thiserror::Error;

use crate::cache::MemoryHotCache;
use crate::config::{ConfigError, EngineConfig};
use crate::rate_limiter::RateLimiter;
use crate::resolver::{PriceResolver, Tiers};
use crate::scheduler::{RefreshScheduler, SchedulerError};
use crate::upstream::{AlphaVantageProvider, UpstreamProvider};
use crate::warm_store::DuckDbWarmStore;
use crate::watchlist::WatchlistTracker;
use crate::ValidationError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A wired engine: one shared limiter and one set of tiers behind both the
/// read path and the refresh job.
pub struct Engine {
    pub resolver: Arc<PriceResolver>,
    pub scheduler: RefreshScheduler,
    pub watchlist: WatchlistTracker,
    pub limiter: Arc<RateLimiter>,
    pub warehouse: Warehouse,
}

impl Engine {
    /// Open the warehouse and wire the production Alpha Vantage provider.
    pub async fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        let provider = Arc::new(AlphaVantageProvider::new(&config.provider));
        Self::with_provider(config, provider).await
    }

    pub async fn with_provider(
        config: &EngineConfig,
        upstream: Arc<dyn UpstreamProvider>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let warehouse_config = config.warehouse.to_warehouse_config();
        let warehouse = tokio::task::spawn_blocking(move || Warehouse::open(warehouse_config))
            .await
            .map_err(|e| WarehouseError::Io(std::io::Error::other(e.to_string())))??;

        let limiter = Arc::new(RateLimiter::new(config.limiter));
        let tiers = Tiers::new(
            Arc::new(MemoryHotCache::new(
                config.resolver.hot_ttl,
                config.hot_cache.max_entries,
            )),
            Arc::new(DuckDbWarmStore::new(warehouse.clone())),
            upstream,
            Arc::clone(&limiter),
        );

        let mut watchlist_config = config.watchlist.clone();
        watchlist_config.active_window_days = config.refresh.active_window_days;
        let watchlist = WatchlistTracker::from_config(&watchlist_config).await?;

        let scheduler = RefreshScheduler::new(
            tiers.clone(),
            watchlist.clone(),
            config.refresh.clone(),
            config.resolver.upstream_timeout,
            config.resolver.hot_ttl,
        )?;
        let resolver = Arc::new(PriceResolver::new(tiers, config.resolver.clone()));

        tracing::debug!(
            db_path = %warehouse.db_path().display(),
            per_minute = config.limiter.per_minute,
            per_day = config.limiter.per_day,
            "engine assembled"
        );

        Ok(Self {
            resolver,
            scheduler,
            watchlist,
            limiter,
            warehouse,
        })
    }
}

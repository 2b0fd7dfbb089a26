//! Engine configuration: one typed structure, loaded from an optional TOML
//! file and `QUOTETIER_*` environment overrides.
//!
//! Nested keys use a double underscore, e.g. `QUOTETIER_REFRESH__BATCH_SIZE=10`
//! or `QUOTETIER_LIMITER__PER_MINUTE=75`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use quotetier_warehouse::WarehouseConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::rate_limiter::LimiterConfig;
use crate::resolver::ResolverConfig;
use crate::scheduler::RefreshConfig;
use crate::upstream::AlphaVantageConfig;
use crate::watchlist::WatchlistConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HotCacheConfig {
    pub max_entries: usize,
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Data directory; defaults to `QUOTETIER_HOME`, then `~/.quotetier`.
    pub home: Option<PathBuf>,
    pub max_pool_size: Option<usize>,
}

impl WarehouseSettings {
    pub fn to_warehouse_config(&self) -> WarehouseConfig {
        let mut config = match &self.home {
            Some(home) => WarehouseConfig::in_dir(home),
            None => WarehouseConfig::default(),
        };
        if let Some(size) = self.max_pool_size {
            config.max_pool_size = size;
        }
        config
    }
}

/// Everything needed to assemble the engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub limiter: LimiterConfig,
    pub refresh: RefreshConfig,
    pub provider: AlphaVantageConfig,
    pub hot_cache: HotCacheConfig,
    pub warehouse: WarehouseSettings,
    pub watchlist: WatchlistConfig,
}

impl EngineConfig {
    /// Load from `path` (if given) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix("QUOTETIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.batch_size == 0 {
            return Err(ConfigError::invalid("refresh.batch_size", "must be positive"));
        }
        if self.refresh.max_concurrent_instances != 1 {
            return Err(ConfigError::invalid(
                "refresh.max_concurrent_instances",
                format!("must be 1, got {}", self.refresh.max_concurrent_instances),
            ));
        }
        if let Err(error) = self.refresh.schedule() {
            return Err(ConfigError::invalid("refresh.cron_expression", error.to_string()));
        }
        if self.limiter.per_minute == 0 {
            return Err(ConfigError::invalid("limiter.per_minute", "must be positive"));
        }
        if self.limiter.window.is_zero() {
            return Err(ConfigError::invalid("limiter.window", "must be positive"));
        }
        if self.resolver.page_size == 0 {
            return Err(ConfigError::invalid("resolver.page_size", "must be positive"));
        }
        for raw in &self.watchlist.pinned {
            if let Err(error) = crate::Ticker::parse(raw) {
                return Err(ConfigError::invalid("watchlist.pinned", error.to_string()));
            }
        }
        Ok(())
    }
}

/// `Duration` as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `Duration` as whole milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.refresh.max_concurrent_instances, 1);
        assert_eq!(config.limiter.window, Duration::from_secs(60));
    }

    #[test]
    fn loads_toml_file_with_nested_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quotetier.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(
            file,
            r#"
[resolver]
max_age = 300
upstream_timeout = 1500

[limiter]
per_minute = 75
per_day = 0

[refresh]
cron_expression = "0 * * * *"
batch_size = 10

[watchlist]
pinned = ["ibm", "aapl"]
"#
        )
        .expect("write");

        let config = EngineConfig::load(Some(&path)).expect("load");
        assert_eq!(config.resolver.max_age, Duration::from_secs(300));
        assert_eq!(config.resolver.upstream_timeout, Duration::from_millis(1_500));
        assert_eq!(config.limiter.per_minute, 75);
        assert_eq!(config.limiter.per_day, 0);
        assert_eq!(config.refresh.batch_size, 10);
        assert_eq!(config.refresh.batch_delay_seconds, 12);
        assert_eq!(config.watchlist.pinned, vec!["ibm", "aapl"]);
    }

    #[test]
    fn rejects_concurrent_instances_and_bad_cron() {
        let mut config = EngineConfig::default();
        config.refresh.max_concurrent_instances = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "refresh.max_concurrent_instances", .. })
        ));

        let mut config = EngineConfig::default();
        config.refresh.cron_expression = String::from("every minute");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "refresh.cron_expression", .. })
        ));

        let mut config = EngineConfig::default();
        config.limiter.per_minute = 0;
        assert!(config.validate().is_err());
    }
}

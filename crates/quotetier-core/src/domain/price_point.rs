use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Interval, Money, Ticker, UtcDateTime};
use crate::ValidationError;

/// Tier a price point was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Hot,
    Warm,
    Upstream,
}

impl PriceSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Upstream => "upstream",
        }
    }
}

impl Display for PriceSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceSource {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "upstream" => Ok(Self::Upstream),
            _ => Err(ValidationError::InvalidSource {
                value: value.to_owned(),
            }),
        }
    }
}

/// Open/high/low/close/volume attached to series observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<u64>,
}

impl Ohlcv {
    pub fn new(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Option<u64>,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(ValidationError::NegativeValue { field });
            }
        }
        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }
        if open > high || open < low || close > high || close < low {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            open: open.normalize(),
            high: high.normalize(),
            low: low.normalize(),
            close: close.normalize(),
            volume,
        })
    }
}

/// A single price observation.
///
/// Points are immutable once built; tier changes produce a new value through
/// [`PricePoint::with_source`] or [`PricePoint::into_stale`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    ticker: Ticker,
    price: Money,
    timestamp: UtcDateTime,
    source: PriceSource,
    interval: Interval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ohlcv: Option<Ohlcv>,
    #[serde(default)]
    stale: bool,
}

impl PricePoint {
    /// Build a point, rejecting observations stamped after `now`.
    pub fn new(
        ticker: Ticker,
        price: Money,
        timestamp: UtcDateTime,
        source: PriceSource,
        interval: Interval,
        now: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        if timestamp > now {
            return Err(ValidationError::TimestampInFuture {
                value: timestamp.format_rfc3339(),
            });
        }

        Ok(Self {
            ticker,
            price,
            timestamp,
            source,
            interval,
            ohlcv: None,
            stale: false,
        })
    }

    #[must_use]
    pub fn with_ohlcv(mut self, ohlcv: Ohlcv) -> Self {
        self.ohlcv = Some(ohlcv);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: PriceSource) -> Self {
        self.source = source;
        self
    }

    /// Mark the point as served past its freshness bound.
    #[must_use]
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn price(&self) -> &Money {
        &self.price
    }

    pub fn timestamp(&self) -> UtcDateTime {
        self.timestamp
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn ohlcv(&self) -> Option<&Ohlcv> {
        self.ohlcv.as_ref()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn age(&self, now: UtcDateTime) -> Duration {
        now.duration_since(self.timestamp)
    }

    /// `true` while the observation is no older than `max_age`.
    pub fn is_fresh(&self, now: UtcDateTime, max_age: Duration) -> bool {
        self.age(now) <= max_age
    }
}

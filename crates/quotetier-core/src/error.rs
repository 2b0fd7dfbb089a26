use thiserror::Error;

use crate::domain::{Ticker, UtcDateTime};
use crate::upstream::UpstreamError;
use crate::warm_store::WarmStoreError;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker cannot be empty")]
    EmptyTicker,
    #[error("ticker length {len} exceeds max {max}")]
    TickerTooLong { len: usize, max: usize },
    #[error("ticker must start with an ASCII letter: '{ch}'")]
    TickerInvalidStart { ch: char },
    #[error("ticker contains invalid character '{ch}' at index {index}")]
    TickerInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of realtime, 1day, 1hour, 5min, 1min")]
    InvalidInterval { value: String },
    #[error("invalid price source '{value}', expected one of hot, warm, upstream")]
    InvalidSource { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp {value} is in the future")]
    TimestampInFuture { value: String },
    #[error("timestamp is outside the representable range")]
    TimestampOutOfRange,

    #[error("currency must be a 3-letter uppercase ISO code: '{value}'")]
    InvalidCurrency { value: String },
    #[error("'{value}' is not a decimal amount")]
    InvalidDecimal { value: String },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,

    #[error("range start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
}

/// Why a ticker could not be resolved from any tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotFoundReason {
    /// The provider reported the symbol as unknown.
    RejectedByProvider,
    /// The quota denied the call and nothing was cached.
    QuotaExhausted,
    /// The provider failed or timed out and nothing was cached.
    ProviderUnavailable,
}

impl NotFoundReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RejectedByProvider => "rejected_by_provider",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ProviderUnavailable => "provider_unavailable",
        }
    }
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the price resolver.
///
/// Quota denials and provider outages are absorbed whenever any cached point
/// exists; they only appear here folded into [`ResolveError::TickerNotFound`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("ticker '{ticker}' not found in any tier ({reason})")]
    TickerNotFound {
        ticker: Ticker,
        reason: NotFoundReason,
    },

    #[error("no price for '{ticker}' at or before {at}")]
    DataUnavailable { ticker: Ticker, at: UtcDateTime },

    #[error("range start {start} is after end {end}")]
    InvalidRange { start: UtcDateTime, end: UtcDateTime },

    #[error(transparent)]
    Store(#[from] WarmStoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ResolveError {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TickerNotFound { .. } => "ticker_not_found",
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::InvalidRange { .. } => "invalid_range",
            Self::Store(_) => "store_error",
            Self::Upstream(_) => "upstream_error",
            Self::Validation(_) => "validation_error",
        }
    }
}

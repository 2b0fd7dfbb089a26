//! Upstream tier: the only component that talks to the market-data API.

mod alphavantage;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::domain::{Interval, PricePoint, Ticker};

pub use alphavantage::{AlphaVantageConfig, AlphaVantageProvider};

/// Failure classes a provider must keep apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// The provider's own quota refused the call.
    RateLimited,
    /// The provider does not know the symbol.
    NotFound,
    /// Network failure, server error or open circuit.
    Unavailable,
    /// A response arrived but could not be understood.
    InvalidResponse,
}

impl UpstreamErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

/// Error returned by an [`UpstreamProvider`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    kind: UpstreamErrorKind,
    message: String,
}

impl UpstreamError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::RateLimited,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::InvalidResponse,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> UpstreamErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a later attempt could succeed without caller changes.
    pub const fn retryable(&self) -> bool {
        matches!(self.kind, UpstreamErrorKind::Unavailable)
    }
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind.as_str())
    }
}

impl std::error::Error for UpstreamError {}

/// Contract for an external market-data API.
///
/// Implementations perform exactly one network call per invocation; quota
/// accounting happens in the caller through the shared rate limiter.
pub trait UpstreamProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Latest price for `ticker`, tagged `source = upstream`.
    fn fetch_current<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> Pin<Box<dyn Future<Output = Result<PricePoint, UpstreamError>> + Send + 'a>>;

    /// Historical observations for `ticker`, oldest first.
    fn fetch_series<'a>(
        &'a self,
        ticker: &'a Ticker,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PricePoint>, UpstreamError>> + Send + 'a>>;
}

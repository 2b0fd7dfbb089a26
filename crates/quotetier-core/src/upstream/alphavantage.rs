use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use super::{UpstreamError, UpstreamProvider};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::{
    Currency, Interval, Money, Ohlcv, PricePoint, PriceSource, Ticker, UtcDateTime,
};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Connection settings for the Alpha Vantage API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlphaVantageConfig {
    /// Falls back to `QUOTETIER_ALPHAVANTAGE_API_KEY`, then `ALPHAVANTAGE_API_KEY`.
    pub api_key: Option<String>,
    pub base_url: String,
    #[serde(with = "crate::config::duration_millis")]
    pub request_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for AlphaVantageConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: String::from(DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(5),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl AlphaVantageConfig {
    pub fn resolve_api_key(&self) -> String {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("QUOTETIER_ALPHAVANTAGE_API_KEY").ok())
            .or_else(|| std::env::var("ALPHAVANTAGE_API_KEY").ok())
            .unwrap_or_else(|| String::from("demo"))
    }
}

/// Alpha Vantage adapter.
#[derive(Clone)]
pub struct AlphaVantageProvider {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    base_url: String,
    request_timeout: Duration,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AlphaVantageProvider {
    pub fn new(config: &AlphaVantageConfig) -> Self {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(config: &AlphaVantageConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            api_key: config.resolve_api_key(),
            base_url: config.base_url.clone(),
            request_timeout: config.request_timeout,
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker)),
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn request(&self, function: &str, ticker: &Ticker) -> HttpRequest {
        HttpRequest::get(&self.base_url)
            .with_query("function", function)
            .with_query("symbol", ticker.as_str())
            .with_timeout(self.request_timeout)
    }

    /// Send `request` and return the decoded top-level JSON object.
    async fn call(&self, request: HttpRequest) -> Result<Map<String, Value>, UpstreamError> {
        if let Err(open) = self.circuit_breaker.admit() {
            return Err(UpstreamError::unavailable(format!("alphavantage {open}")));
        }

        let request = request.with_query("apikey", &self.api_key);
        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            UpstreamError::unavailable(format!("alphavantage transport error: {error}"))
        })?;

        if response.status >= 500 {
            self.circuit_breaker.record_failure();
        } else {
            self.circuit_breaker.record_success();
        }
        check_status(&response)?;
        classify_body(&response.body)
    }

    async fn current(&self, ticker: &Ticker) -> Result<PricePoint, UpstreamError> {
        let body = self.call(self.request("GLOBAL_QUOTE", ticker)).await?;

        let quote = match body.get("Global Quote") {
            Some(Value::Object(fields)) if !fields.is_empty() => Value::Object(fields.clone()),
            _ => {
                return Err(UpstreamError::not_found(format!(
                    "alphavantage has no quote for '{ticker}'"
                )))
            }
        };
        let quote: GlobalQuote = serde_json::from_value(quote).map_err(|e| {
            UpstreamError::invalid_response(format!("failed to parse alphavantage quote: {e}"))
        })?;

        let now = UtcDateTime::now();
        let price = parse_decimal(&quote.price)?;
        let point = PricePoint::new(
            ticker.clone(),
            money(price)?,
            now,
            PriceSource::Upstream,
            Interval::RealTime,
            now,
        )
        .map_err(|e| UpstreamError::invalid_response(e.to_string()))?;

        let bar = match (&quote.open, &quote.high, &quote.low) {
            (Some(open), Some(high), Some(low)) => Ohlcv::new(
                parse_decimal(open)?,
                parse_decimal(high)?,
                parse_decimal(low)?,
                price,
                quote.volume.as_deref().and_then(|v| v.trim().parse().ok()),
            )
            .ok(),
            _ => None,
        };

        Ok(match bar {
            Some(bar) => point.with_ohlcv(bar),
            None => point,
        })
    }

    async fn series(
        &self,
        ticker: &Ticker,
        interval: Interval,
    ) -> Result<Vec<PricePoint>, UpstreamError> {
        let (request, series_key) = match interval {
            Interval::OneDay => (
                self.request("TIME_SERIES_DAILY", ticker),
                String::from("Time Series (Daily)"),
            ),
            Interval::OneHour | Interval::FiveMinutes | Interval::OneMinute => {
                let label = intraday_label(interval);
                (
                    self.request("TIME_SERIES_INTRADAY", ticker)
                        .with_query("interval", label),
                    format!("Time Series ({label})"),
                )
            }
            Interval::RealTime => return Ok(vec![self.current(ticker).await?]),
        };

        let body = self.call(request).await?;
        let series = match body.get(&series_key) {
            Some(Value::Object(rows)) if !rows.is_empty() => Value::Object(rows.clone()),
            _ => {
                return Err(UpstreamError::not_found(format!(
                    "alphavantage has no {interval} series for '{ticker}'"
                )))
            }
        };
        let rows: BTreeMap<String, SeriesBar> = serde_json::from_value(series).map_err(|e| {
            UpstreamError::invalid_response(format!("failed to parse alphavantage series: {e}"))
        })?;

        let now = UtcDateTime::now();
        let mut points = Vec::with_capacity(rows.len());
        // BTreeMap keys sort lexically, which for these formats is oldest first.
        for (stamp, row) in rows {
            let timestamp = parse_series_timestamp(&stamp)?;
            if timestamp > now {
                tracing::debug!(%ticker, %stamp, "dropping series row stamped in the future");
                continue;
            }
            let close = parse_decimal(&row.close)?;
            let bar = Ohlcv::new(
                parse_decimal(&row.open)?,
                parse_decimal(&row.high)?,
                parse_decimal(&row.low)?,
                close,
                row.volume.trim().parse().ok(),
            );
            let point =
                PricePoint::new(ticker.clone(), money(close)?, timestamp, PriceSource::Upstream, interval, now)
                    .map_err(|e| UpstreamError::invalid_response(e.to_string()))?;
            match bar {
                Ok(bar) => points.push(point.with_ohlcv(bar)),
                Err(error) => {
                    tracing::debug!(%ticker, %stamp, %error, "series row has inconsistent bar");
                    points.push(point);
                }
            }
        }

        Ok(points)
    }
}

impl UpstreamProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        "alphavantage"
    }

    fn fetch_current<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> Pin<Box<dyn Future<Output = Result<PricePoint, UpstreamError>> + Send + 'a>> {
        Box::pin(self.current(ticker))
    }

    fn fetch_series<'a>(
        &'a self,
        ticker: &'a Ticker,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PricePoint>, UpstreamError>> + Send + 'a>> {
        Box::pin(self.series(ticker, interval))
    }
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "02. open", default)]
    open: Option<String>,
    #[serde(rename = "03. high", default)]
    high: Option<String>,
    #[serde(rename = "04. low", default)]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: String,
    #[serde(rename = "06. volume", default)]
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume", default)]
    volume: String,
}

fn check_status(response: &HttpResponse) -> Result<(), UpstreamError> {
    match response.status {
        status if (200..300).contains(&status) => Ok(()),
        429 => Err(UpstreamError::rate_limited("alphavantage returned status 429")),
        status if status >= 500 => Err(UpstreamError::unavailable(format!(
            "alphavantage returned status {status}"
        ))),
        status => Err(UpstreamError::invalid_response(format!(
            "alphavantage returned status {status}"
        ))),
    }
}

/// Map the provider's in-band error objects onto error kinds.
///
/// Alpha Vantage answers quota and symbol errors with HTTP 200.
fn classify_body(body: &str) -> Result<Map<String, Value>, UpstreamError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        UpstreamError::invalid_response(format!("failed to parse alphavantage response: {e}"))
    })?;
    let Value::Object(map) = value else {
        return Err(UpstreamError::invalid_response(
            "alphavantage response is not a JSON object",
        ));
    };

    if let Some(message) = map.get("Error Message").and_then(Value::as_str) {
        return Err(UpstreamError::not_found(message));
    }
    for key in ["Note", "Information"] {
        if let Some(message) = map.get(key).and_then(Value::as_str) {
            return Err(UpstreamError::rate_limited(message));
        }
    }

    Ok(map)
}

fn intraday_label(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1min",
        Interval::FiveMinutes => "5min",
        _ => "60min",
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, UpstreamError> {
    Decimal::from_str(raw.trim()).map_err(|_| {
        UpstreamError::invalid_response(format!("alphavantage sent non-decimal price '{raw}'"))
    })
}

fn money(amount: Decimal) -> Result<Money, UpstreamError> {
    Money::new(amount, Currency::usd()).map_err(|e| UpstreamError::invalid_response(e.to_string()))
}

// Intraday stamps carry no offset and are read as UTC.
fn parse_series_timestamp(raw: &str) -> Result<UtcDateTime, UpstreamError> {
    let trimmed = raw.trim();
    if let Ok(value) = PrimitiveDateTime::parse(
        trimmed,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(UtcDateTime::from_naive_utc(value));
    }
    Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
        .map(UtcDateTime::start_of_day)
        .map_err(|_| {
            UpstreamError::invalid_response(format!("alphavantage sent invalid timestamp '{raw}'"))
        })
}

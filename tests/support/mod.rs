//! Scripted fakes shared by the behavior suites.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quotetier_core::{
    Currency, HttpClient, HttpError, HttpRequest, HttpResponse, Interval, LimiterConfig,
    MemoryHotCache, MemoryWarmStore, Money, PricePoint, PriceSource, RateLimiter, Ticker, Tiers,
    UpstreamError, UpstreamErrorKind, UpstreamProvider, UtcDateTime,
};
use rust_decimal::Decimal;
use tokio::time::Instant;

pub fn ticker(raw: &str) -> Ticker {
    Ticker::parse(raw).expect("valid ticker")
}

pub fn usd(amount: &str) -> Money {
    Money::parse(amount, Currency::usd()).expect("valid amount")
}

/// A stored observation of `raw` at `timestamp`.
pub fn point(raw: &str, amount: &str, timestamp: UtcDateTime, interval: Interval) -> PricePoint {
    PricePoint::new(
        ticker(raw),
        usd(amount),
        timestamp,
        PriceSource::Upstream,
        interval,
        UtcDateTime::now(),
    )
    .expect("valid point")
}

pub fn hours_ago(hours: u64) -> UtcDateTime {
    UtcDateTime::now().saturating_sub(Duration::from_secs(hours * 3_600))
}

pub fn relaxed_limits() -> LimiterConfig {
    LimiterConfig {
        per_minute: 1_000,
        window: Duration::from_secs(60),
        per_day: 0,
    }
}

pub fn limits(per_minute: u32) -> LimiterConfig {
    LimiterConfig {
        per_minute,
        window: Duration::from_secs(60),
        per_day: 0,
    }
}

/// Tiers over in-memory stores; the warm store is returned for seeding.
pub fn memory_tiers(
    provider: Arc<FakeProvider>,
    limits: LimiterConfig,
) -> (Tiers, MemoryWarmStore) {
    let warm = MemoryWarmStore::new();
    let tiers = Tiers::new(
        Arc::new(MemoryHotCache::new(Duration::from_secs(60), 1_000)),
        Arc::new(warm.clone()),
        provider,
        Arc::new(RateLimiter::new(limits)),
    );
    (tiers, warm)
}

fn scripted_error(kind: UpstreamErrorKind, ticker: &Ticker) -> UpstreamError {
    match kind {
        UpstreamErrorKind::RateLimited => UpstreamError::rate_limited("scripted quota note"),
        UpstreamErrorKind::NotFound => UpstreamError::not_found(format!("no such ticker '{ticker}'")),
        UpstreamErrorKind::Unavailable => UpstreamError::unavailable("scripted outage"),
        UpstreamErrorKind::InvalidResponse => UpstreamError::invalid_response("scripted garbage"),
    }
}

/// Upstream double that answers from a price table and records every call.
#[derive(Default)]
pub struct FakeProvider {
    prices: HashMap<Ticker, Decimal>,
    series: HashMap<Ticker, Vec<PricePoint>>,
    delay: Duration,
    quote_age: Duration,
    permanent_failure: Option<UpstreamErrorKind>,
    transient_failures: AtomicU32,
    calls: Mutex<Vec<(Ticker, Instant)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, raw: &str, amount: &str) -> Self {
        self.prices
            .insert(ticker(raw), Decimal::from_str(amount).expect("decimal"));
        self
    }

    pub fn with_series(mut self, raw: &str, points: Vec<PricePoint>) -> Self {
        self.series.insert(ticker(raw), points);
        self
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Quotes come back stamped this long before the call.
    pub fn with_quote_age(mut self, age: Duration) -> Self {
        self.quote_age = age;
        self
    }

    /// The first `count` calls fail as a provider outage.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn always_failing(mut self, kind: UpstreamErrorKind) -> Self {
        self.permanent_failure = Some(kind);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn calls_for(&self, raw: &str) -> usize {
        let wanted = ticker(raw);
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(called, _)| *called == wanted)
            .count()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    async fn answer(&self, ticker: &Ticker) -> Result<(), UpstreamError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((ticker.clone(), Instant::now()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(kind) = self.permanent_failure {
            return Err(scripted_error(kind, ticker));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(scripted_error(UpstreamErrorKind::Unavailable, ticker));
        }
        Ok(())
    }
}

impl UpstreamProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn fetch_current<'a>(
        &'a self,
        ticker: &'a Ticker,
    ) -> Pin<Box<dyn Future<Output = Result<PricePoint, UpstreamError>> + Send + 'a>> {
        Box::pin(async move {
            self.answer(ticker).await?;
            let Some(amount) = self.prices.get(ticker) else {
                return Err(scripted_error(UpstreamErrorKind::NotFound, ticker));
            };
            let now = UtcDateTime::now();
            let price = Money::new(*amount, Currency::usd())
                .map_err(|e| UpstreamError::invalid_response(e.to_string()))?;
            PricePoint::new(
                ticker.clone(),
                price,
                now.saturating_sub(self.quote_age),
                PriceSource::Upstream,
                Interval::RealTime,
                now,
            )
            .map_err(|e| UpstreamError::invalid_response(e.to_string()))
        })
    }

    fn fetch_series<'a>(
        &'a self,
        ticker: &'a Ticker,
        _interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PricePoint>, UpstreamError>> + Send + 'a>> {
        Box::pin(async move {
            self.answer(ticker).await?;
            self.series
                .get(ticker)
                .cloned()
                .ok_or_else(|| scripted_error(UpstreamErrorKind::NotFound, ticker))
        })
    }
}

/// HTTP double replaying canned responses in order and keeping the URLs it saw.
#[derive(Default)]
pub struct FakeHttpClient {
    responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Ok(HttpResponse {
                status,
                body: body.to_owned(),
            }));
        self
    }

    pub fn fail(self, error: HttpError) -> Self {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl HttpClient for FakeHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("requests lock")
                .push(request.full_url());
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::Request(String::from("no scripted response left"))))
        })
    }
}

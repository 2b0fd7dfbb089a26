//! Contract tests for the Alpha Vantage adapter against canned HTTP payloads.

use std::sync::Arc;
use std::time::Duration;

use quotetier_core::{
    AlphaVantageConfig, AlphaVantageProvider, CircuitBreakerConfig, CircuitState, HttpError,
    Interval, PriceSource, UpstreamErrorKind, UpstreamProvider, UtcDateTime,
};
use quotetier_tests::support::{ticker, usd, FakeHttpClient};

const GLOBAL_QUOTE: &str = r#"{
    "Global Quote": {
        "01. symbol": "IBM",
        "02. open": "184.1000",
        "03. high": "186.2000",
        "04. low": "183.5500",
        "05. price": "185.6400",
        "06. volume": "4127913",
        "07. latest trading day": "2024-01-05",
        "08. previous close": "184.2500",
        "09. change": "1.3900",
        "10. change percent": "0.7544%"
    }
}"#;

const DAILY_SERIES: &str = r#"{
    "Meta Data": { "2. Symbol": "AAPL" },
    "Time Series (Daily)": {
        "2024-01-04": { "1. open": "182.15", "2. high": "183.09", "3. low": "180.88", "4. close": "181.91", "5. volume": "71983570" },
        "2024-01-02": { "1. open": "187.15", "2. high": "188.44", "3. low": "183.89", "4. close": "185.64", "5. volume": "82488674" },
        "2024-01-03": { "1. open": "184.22", "2. high": "185.88", "3. low": "183.43", "4. close": "184.25", "5. volume": "58414460" }
    }
}"#;

const HOURLY_SERIES: &str = r#"{
    "Time Series (60min)": {
        "2024-01-05 15:00:00": { "1. open": "181.20", "2. high": "181.90", "3. low": "180.95", "4. close": "181.18", "5. volume": "1200000" },
        "2024-01-05 14:00:00": { "1. open": "180.80", "2. high": "181.30", "3. low": "180.60", "4. close": "181.20", "5. volume": "900000" }
    }
}"#;

fn provider(http: Arc<FakeHttpClient>) -> AlphaVantageProvider {
    let config = AlphaVantageConfig {
        api_key: Some(String::from("test-key")),
        base_url: String::from("https://av.test/query"),
        request_timeout: Duration::from_secs(2),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_secs(30),
        },
    };
    AlphaVantageProvider::with_http_client(&config, http)
}

// =============================================================================
// Successful payloads
// =============================================================================

#[tokio::test]
async fn a_global_quote_becomes_a_realtime_upstream_point() {
    // Given: a well-formed quote payload
    let http = Arc::new(FakeHttpClient::new().respond(200, GLOBAL_QUOTE));
    let provider = provider(Arc::clone(&http));
    let before = UtcDateTime::now();

    // When
    let point = provider.fetch_current(&ticker("IBM")).await.expect("quote");

    // Then: exact decimal price, stamped at fetch time, with the day's bar
    assert_eq!(*point.price(), usd("185.64"));
    assert_eq!(point.source(), PriceSource::Upstream);
    assert_eq!(point.interval(), Interval::RealTime);
    assert!(point.timestamp() >= before);
    let bar = point.ohlcv().expect("bar");
    assert_eq!(bar.volume, Some(4_127_913));

    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("https://av.test/query?"));
    assert!(requests[0].contains("function=GLOBAL_QUOTE"));
    assert!(requests[0].contains("symbol=IBM"));
    assert!(requests[0].contains("apikey=test-key"));
}

#[tokio::test]
async fn a_daily_series_is_returned_oldest_first_at_utc_midnight() {
    let http = Arc::new(FakeHttpClient::new().respond(200, DAILY_SERIES));
    let provider = provider(Arc::clone(&http));

    let points = provider
        .fetch_series(&ticker("AAPL"), Interval::OneDay)
        .await
        .expect("series");

    let stamps: Vec<_> = points.iter().map(|p| p.timestamp().format_rfc3339()).collect();
    assert_eq!(
        stamps,
        vec![
            "2024-01-02T00:00:00Z",
            "2024-01-03T00:00:00Z",
            "2024-01-04T00:00:00Z"
        ]
    );
    assert!(points.iter().all(|p| p.interval() == Interval::OneDay));
    assert_eq!(*points[0].price(), usd("185.64"));
    assert!(http.requests()[0].contains("function=TIME_SERIES_DAILY"));
}

#[tokio::test]
async fn an_hourly_series_uses_the_intraday_endpoint() {
    let http = Arc::new(FakeHttpClient::new().respond(200, HOURLY_SERIES));
    let provider = provider(Arc::clone(&http));

    let points = provider
        .fetch_series(&ticker("AAPL"), Interval::OneHour)
        .await
        .expect("series");

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp().format_rfc3339(), "2024-01-05T14:00:00Z");
    assert_eq!(*points[1].price(), usd("181.18"));
    let request = &http.requests()[0];
    assert!(request.contains("function=TIME_SERIES_INTRADAY"));
    assert!(request.contains("interval=60min"));
}

// =============================================================================
// Error classification
// =============================================================================

#[tokio::test]
async fn an_empty_global_quote_means_the_ticker_is_unknown() {
    let http = Arc::new(FakeHttpClient::new().respond(200, r#"{"Global Quote": {}}"#));
    let provider = provider(http);

    let error = provider.fetch_current(&ticker("ZZZZ")).await.expect_err("unknown");

    assert_eq!(error.kind(), UpstreamErrorKind::NotFound);
    assert!(!error.retryable());
}

#[tokio::test]
async fn in_band_quota_notes_and_http_429_are_rate_limits() {
    let http = Arc::new(
        FakeHttpClient::new()
            .respond(
                200,
                r#"{"Note": "Our standard API call frequency is 5 calls per minute."}"#,
            )
            .respond(429, ""),
    );
    let provider = provider(http);
    let ibm = ticker("IBM");

    let note = provider.fetch_current(&ibm).await.expect_err("note");
    let throttled = provider.fetch_current(&ibm).await.expect_err("429");

    assert_eq!(note.kind(), UpstreamErrorKind::RateLimited);
    assert_eq!(throttled.kind(), UpstreamErrorKind::RateLimited);
    assert_eq!(provider.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn a_non_json_body_is_an_invalid_response() {
    let http = Arc::new(FakeHttpClient::new().respond(200, "<html>maintenance</html>"));
    let provider = provider(http);

    let error = provider.fetch_current(&ticker("IBM")).await.expect_err("garbage");

    assert_eq!(error.kind(), UpstreamErrorKind::InvalidResponse);
}

#[tokio::test]
async fn repeated_server_errors_open_the_circuit_and_stop_traffic() {
    // Given: a provider answering 503 and then failing at the transport
    let http = Arc::new(
        FakeHttpClient::new()
            .respond(503, "")
            .fail(HttpError::Timeout(String::from("deadline elapsed"))),
    );
    let provider = provider(Arc::clone(&http));
    let ibm = ticker("IBM");

    // When: two failures trip the breaker and a third call follows
    let first = provider.fetch_current(&ibm).await.expect_err("503");
    let second = provider.fetch_current(&ibm).await.expect_err("timeout");
    let third = provider.fetch_current(&ibm).await.expect_err("open circuit");

    // Then: all are retryable outages and the third never reached HTTP
    for error in [&first, &second, &third] {
        assert_eq!(error.kind(), UpstreamErrorKind::Unavailable);
        assert!(error.retryable());
    }
    assert_eq!(provider.circuit_breaker().state(), CircuitState::Open);
    assert_eq!(http.requests().len(), 2);
}

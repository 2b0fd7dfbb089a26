//! Behavior tests for the tiered read path.
//!
//! These exercise how `PriceResolver` falls through hot, warm and upstream
//! tiers, and what it serves when the quota or the provider says no.

use std::sync::Arc;
use std::time::Duration;

use quotetier_core::{
    BackfillOutcome, Interval, NotFoundReason, PriceResolver, PriceSource, ResolveError,
    ResolverConfig, RetryConfig, UpstreamErrorKind, UtcDateTime, WarmStore,
};
use quotetier_tests::support::{
    hours_ago, limits, memory_tiers, point, relaxed_limits, ticker, usd, FakeProvider,
};
use tokio::task::JoinSet;

fn config() -> ResolverConfig {
    ResolverConfig {
        retry: RetryConfig::no_retry(),
        ..ResolverConfig::default()
    }
}

fn day(raw: &str) -> UtcDateTime {
    UtcDateTime::parse_lenient(raw).expect("date")
}

// =============================================================================
// Current price: tier fallthrough
// =============================================================================

#[tokio::test]
async fn when_no_tier_has_data_the_upstream_price_is_served_and_written_back() {
    // Given: empty tiers and a provider quoting IBM
    let provider = Arc::new(FakeProvider::new().with_price("IBM", "185.64"));
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = PriceResolver::new(tiers, config());
    let ibm = ticker("IBM");

    // When: the price is requested twice
    let first = resolver.get_current(&ibm).await.expect("upstream price");
    let second = resolver.get_current(&ibm).await.expect("cached price");

    // Then: one provider call, the repeat is served hot, and warm has the point
    assert_eq!(first.source(), PriceSource::Upstream);
    assert_eq!(*first.price(), usd("185.64"));
    assert_eq!(second.source(), PriceSource::Hot);
    assert_eq!(second.price(), first.price());
    assert_eq!(provider.calls(), 1);

    let stored = warm.latest(&ibm).await.expect("warm read").expect("written back");
    assert_eq!(stored.price(), first.price());
    assert_eq!(stored.timestamp(), first.timestamp());
}

#[tokio::test]
async fn when_warm_data_is_fresh_no_upstream_call_is_made() {
    // Given: a warm point observed five minutes ago
    let provider = Arc::new(FakeProvider::new().with_price("MSFT", "999.99"));
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let observed = UtcDateTime::now().saturating_sub(Duration::from_secs(300));
    warm.upsert(&point("MSFT", "402.10", observed, Interval::RealTime))
        .await
        .expect("seed");
    let resolver = PriceResolver::new(tiers, config());

    // When
    let resolved = resolver.get_current(&ticker("MSFT")).await.expect("price");

    // Then: the warm value wins and the provider is untouched
    assert_eq!(resolved.source(), PriceSource::Warm);
    assert_eq!(*resolved.price(), usd("402.10"));
    assert!(!resolved.is_stale());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_for_one_ticker_share_a_single_upstream_call() {
    // Given: a slow provider
    let provider = Arc::new(
        FakeProvider::new()
            .with_price("IBM", "185.64")
            .with_delay(Duration::from_millis(200)),
    );
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = Arc::new(PriceResolver::new(tiers, config()));

    // When: eight callers miss at the same time
    let mut callers = JoinSet::new();
    for _ in 0..8 {
        let resolver = Arc::clone(&resolver);
        callers.spawn(async move { resolver.get_current(&ticker("IBM")).await });
    }
    let mut points = Vec::new();
    while let Some(joined) = callers.join_next().await {
        points.push(joined.expect("task").expect("price"));
    }

    // Then: one fetch served everybody the very same observation
    assert_eq!(provider.calls(), 1);
    assert_eq!(points.len(), 8);
    let first = &points[0];
    assert_eq!(first.source(), PriceSource::Upstream);
    assert_eq!(*first.price(), usd("185.64"));
    for other in &points[1..] {
        assert_eq!(other, first);
        assert_eq!(other.timestamp(), first.timestamp());
        assert_eq!(other.source(), first.source());
    }
}

// =============================================================================
// Degradation: quota, outages, unknown tickers
// =============================================================================

#[tokio::test]
async fn when_the_quota_is_spent_the_last_stored_price_is_served_stale() {
    // Given: a two-hour-old warm point and an exhausted limiter
    let provider = Arc::new(FakeProvider::new().with_price("IBM", "185.64"));
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), limits(1));
    warm.upsert(&point("IBM", "180.00", hours_ago(2), Interval::RealTime))
        .await
        .expect("seed");
    assert!(tiers.limiter.try_acquire().granted);
    let resolver = PriceResolver::new(tiers, config());

    // When
    let resolved = resolver.get_current(&ticker("IBM")).await.expect("stale price");

    // Then: the stored value comes back flagged, and nothing was fetched
    assert!(resolved.is_stale());
    assert_eq!(resolved.source(), PriceSource::Warm);
    assert_eq!(*resolved.price(), usd("180.00"));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn when_the_quota_is_spent_and_nothing_is_stored_the_ticker_is_not_found() {
    let provider = Arc::new(FakeProvider::new().with_price("IBM", "185.64"));
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), limits(1));
    assert!(tiers.limiter.try_acquire().granted);
    let resolver = PriceResolver::new(tiers, config());

    let error = resolver
        .get_current(&ticker("IBM"))
        .await
        .expect_err("no data anywhere");

    assert_eq!(
        error,
        ResolveError::TickerNotFound {
            ticker: ticker("IBM"),
            reason: NotFoundReason::QuotaExhausted,
        }
    );
    assert_eq!(error.code(), "ticker_not_found");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn a_ticker_the_provider_rejects_is_not_asked_for_again() {
    // Given: a provider that knows nothing about ZZZZ
    let provider = Arc::new(FakeProvider::new());
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = PriceResolver::new(tiers, config());
    let unknown = ticker("ZZZZ");

    // When: it is requested twice
    let first = resolver.get_current(&unknown).await.expect_err("unknown");
    let second = resolver.get_current(&unknown).await.expect_err("still unknown");

    // Then: the second answer comes from the negative cache
    for error in [first, second] {
        assert!(matches!(
            error,
            ResolveError::TickerNotFound {
                reason: NotFoundReason::RejectedByProvider,
                ..
            }
        ));
    }
    assert_eq!(provider.calls_for("ZZZZ"), 1);
}

#[tokio::test(start_paused = true)]
async fn a_transient_outage_is_retried_with_a_fresh_grant() {
    let provider = Arc::new(
        FakeProvider::new()
            .with_price("IBM", "185.64")
            .with_transient_failures(1),
    );
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = PriceResolver::new(
        tiers,
        ResolverConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
                jitter: false,
            },
            ..ResolverConfig::default()
        },
    );

    let resolved = resolver.get_current(&ticker("IBM")).await.expect("retried");

    assert_eq!(resolved.source(), PriceSource::Upstream);
    assert_eq!(provider.calls(), 2);
    let state = resolver.tiers().limiter.snapshot();
    assert_eq!(state.short_window.limit - state.short_window.remaining, 2);
}

#[tokio::test(start_paused = true)]
async fn a_hung_provider_times_out_and_stored_data_is_served() {
    // Given: a provider slower than the upstream timeout
    let provider = Arc::new(
        FakeProvider::new()
            .with_price("IBM", "185.64")
            .with_delay(Duration::from_secs(30)),
    );
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    warm.upsert(&point("IBM", "181.25", hours_ago(3), Interval::RealTime))
        .await
        .expect("seed");
    let resolver = PriceResolver::new(
        tiers,
        ResolverConfig {
            upstream_timeout: Duration::from_secs(2),
            ..config()
        },
    );

    // When
    let started = tokio::time::Instant::now();
    let resolved = resolver.get_current(&ticker("IBM")).await.expect("stale");

    // Then: the caller waited only for the timeout
    assert!(resolved.is_stale());
    assert_eq!(*resolved.price(), usd("181.25"));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn a_persistent_outage_with_no_history_reports_the_provider_unavailable() {
    let provider = Arc::new(FakeProvider::new().always_failing(UpstreamErrorKind::Unavailable));
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = PriceResolver::new(tiers, config());

    let error = resolver.get_current(&ticker("IBM")).await.expect_err("outage");

    assert!(matches!(
        error,
        ResolveError::TickerNotFound {
            reason: NotFoundReason::ProviderUnavailable,
            ..
        }
    ));
}

// =============================================================================
// Historical reads
// =============================================================================

#[tokio::test]
async fn a_historical_instant_with_no_stored_data_is_unavailable_without_fetching() {
    let provider = Arc::new(FakeProvider::new().with_price("AAPL", "190.00"));
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = PriceResolver::new(tiers, config());

    let error = resolver
        .get_at(&ticker("AAPL"), day("2024-01-01"))
        .await
        .expect_err("no history");

    assert_eq!(
        error,
        ResolveError::DataUnavailable {
            ticker: ticker("AAPL"),
            at: day("2024-01-01"),
        }
    );
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn a_historical_instant_resolves_to_the_nearest_earlier_point_within_the_lookback() {
    // Given: two daily closes
    let provider = Arc::new(FakeProvider::new());
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    warm.upsert(&point("AAPL", "185.64", day("2024-01-02"), Interval::OneDay))
        .await
        .expect("seed");
    warm.upsert(&point("AAPL", "181.18", day("2024-01-05"), Interval::OneDay))
        .await
        .expect("seed");
    let resolver = PriceResolver::new(tiers, config());
    let aapl = ticker("AAPL");

    // When / Then: between the closes, the earlier one answers
    let between = resolver
        .get_at(&aapl, UtcDateTime::parse("2024-01-04T12:00:00Z").expect("ts"))
        .await
        .expect("point");
    assert_eq!(between.timestamp(), day("2024-01-02"));
    assert_eq!(*between.price(), usd("185.64"));

    // And an exact hit returns that observation
    let exact = resolver.get_at(&aapl, day("2024-01-05")).await.expect("exact");
    assert_eq!(*exact.price(), usd("181.18"));

    // And beyond the seven-day lookback nothing is served
    let too_far = resolver.get_at(&aapl, day("2024-02-01")).await;
    assert!(matches!(too_far, Err(ResolveError::DataUnavailable { .. })));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn range_reads_page_in_ascending_order_until_exhausted() {
    // Given: five daily points and a page size of two
    let provider = Arc::new(FakeProvider::new());
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let days = ["2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05", "2024-01-08"];
    for (index, raw) in days.iter().enumerate() {
        let amount = format!("{}.00", 180 + index);
        warm.upsert(&point("AAPL", &amount, day(raw), Interval::OneDay))
            .await
            .expect("seed");
    }
    let resolver = PriceResolver::new(
        tiers,
        ResolverConfig {
            page_size: 2,
            ..config()
        },
    );
    let aapl = ticker("AAPL");
    let (start, end) = (day("2024-01-01"), day("2024-01-31"));

    // When: pages are followed by cursor
    let mut seen = Vec::new();
    let mut after = None;
    let mut pages = 0;
    loop {
        let page = resolver
            .range_page(&aapl, start, end, after)
            .await
            .expect("page");
        pages += 1;
        seen.extend(page.points.iter().map(|p| p.timestamp()));
        match page.next_after {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }

    // Then: every point once, in order
    assert_eq!(pages, 3);
    let expected: Vec<_> = days.iter().map(|raw| day(raw)).collect();
    assert_eq!(seen, expected);

    let whole = resolver.get_range(&aapl, start, end).await.expect("range");
    assert_eq!(whole.len(), 5);
    assert!(whole.windows(2).all(|pair| pair[0].timestamp() < pair[1].timestamp()));
}

#[tokio::test]
async fn range_reads_respect_the_point_cap_and_reject_inverted_bounds() {
    let provider = Arc::new(FakeProvider::new());
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    for raw in ["2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"] {
        warm.upsert(&point("AAPL", "180.00", day(raw), Interval::OneDay))
            .await
            .expect("seed");
    }
    let resolver = PriceResolver::new(
        tiers,
        ResolverConfig {
            page_size: 3,
            max_range_points: 3,
            ..config()
        },
    );
    let aapl = ticker("AAPL");

    let capped = resolver
        .get_range(&aapl, day("2024-01-01"), day("2024-01-31"))
        .await
        .expect("range");
    assert_eq!(capped.len(), 3);

    let inverted = resolver
        .get_range(&aapl, day("2024-01-31"), day("2024-01-01"))
        .await;
    assert!(matches!(inverted, Err(ResolveError::InvalidRange { .. })));
}

// =============================================================================
// Backfill
// =============================================================================

#[tokio::test]
async fn backfill_stores_a_sorted_deduplicated_series() {
    // Given: a provider series delivered out of order with a duplicate
    let series = vec![
        point("AAPL", "181.18", day("2024-01-05"), Interval::OneDay),
        point("AAPL", "185.64", day("2024-01-02"), Interval::OneDay),
        point("AAPL", "181.91", day("2024-01-04"), Interval::OneDay),
        point("AAPL", "185.64", day("2024-01-02"), Interval::OneDay),
    ];
    let provider = Arc::new(FakeProvider::new().with_series("AAPL", series));
    let (tiers, warm) = memory_tiers(Arc::clone(&provider), relaxed_limits());
    let resolver = PriceResolver::new(tiers, config());
    let aapl = ticker("AAPL");

    // When
    let outcome = resolver.backfill(&aapl, Interval::OneDay).await.expect("backfill");

    // Then: three distinct rows land and history becomes answerable
    match outcome {
        BackfillOutcome::Stored { batch_id, rows } => {
            assert!(batch_id.starts_with("backfill-"));
            assert_eq!(rows, 3);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(warm.len().await, 3);
    let at = resolver.get_at(&aapl, day("2024-01-03")).await.expect("history");
    assert_eq!(*at.price(), usd("185.64"));
}

#[tokio::test]
async fn backfill_is_deferred_when_the_quota_is_spent() {
    let provider = Arc::new(FakeProvider::new().with_series("AAPL", Vec::new()));
    let (tiers, _warm) = memory_tiers(Arc::clone(&provider), limits(1));
    assert!(tiers.limiter.try_acquire().granted);
    let resolver = PriceResolver::new(tiers, config());

    let outcome = resolver
        .backfill(&ticker("AAPL"), Interval::OneDay)
        .await
        .expect("deferred");

    assert!(matches!(
        outcome,
        BackfillOutcome::Deferred { retry_after_ms } if retry_after_ms > 0
    ));
    assert_eq!(provider.calls(), 0);
}

//! Routing Benchmarks - Hot-Path Performance Validation
//!
//! Benchmarks the per-tick work between an upstream message and a
//! subscriber queue: normalization, validation, routing and the
//! fan-out throttle.
//!
//! Run with: cargo bench --bench routing_bench

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rust_decimal_macros::dec;
use tokio::time::Instant;

use market_feed_router::adapters::feeds::normalize::{SymbolResolver, normalize_primary};
use market_feed_router::adapters::metrics::RouterMetrics;
use market_feed_router::domain::health::HealthTracker;
use market_feed_router::domain::tick::{NormalizedTick, RoutedTick, RoutingReason, SourceId};
use market_feed_router::domain::validator::TickValidator;
use market_feed_router::ports::primary_source::RawMessage;
use market_feed_router::usecases::fanout::SymbolThrottle;
use market_feed_router::usecases::router::DataSourceRouter;

fn tick(price: rust_decimal::Decimal) -> NormalizedTick {
    NormalizedTick {
        symbol: "US:AAPL".to_string(),
        price,
        volume: Some(dec!(100)),
        timestamp: Utc::now(),
        source: SourceId::Primary,
        sequence: 1,
    }
}

/// Benchmark normalizing a streaming quote.
fn bench_normalize_quote(c: &mut Criterion) {
    let message = RawMessage::Quote {
        symbol: "aapl".to_string(),
        bid: 187.2,
        ask: 187.3,
        bid_size: Some(3.0),
        ask_size: Some(5.0),
        timestamp_ms: Utc::now().timestamp_millis(),
    };
    let mut symbols = SymbolResolver::new("US");
    symbols.track(&["US:AAPL".to_string(), "X:BTCUSD".to_string()]);

    c.bench_function("normalize_primary_quote", |b| {
        b.iter(|| {
            let _pending = normalize_primary(black_box(&message), black_box(&symbols));
        });
    });
}

/// Benchmark the full rule chain against a previous tick.
fn bench_validate(c: &mut Criterion) {
    let validator = TickValidator::default();
    let previous = tick(dec!(187.20));
    let next = tick(dec!(187.25));
    let now = Utc::now();

    c.bench_function("validate_with_breaker", |b| {
        b.iter(|| {
            let _verdict = validator.validate_at(black_box(&next), black_box(Some(&previous)), now);
        });
    });
}

/// Benchmark the routing decision on the active source.
fn bench_route(c: &mut Criterion) {
    let router = DataSourceRouter::new(
        Arc::new(HealthTracker::new(Duration::from_secs(30))),
        Arc::new(RouterMetrics::new().unwrap()),
        Duration::from_secs(1),
        Duration::from_secs(10),
    );
    let t = tick(dec!(187.25));

    c.bench_function("route_primary_active", |b| {
        b.iter(|| {
            let _routed = router.route(black_box(t.clone()));
        });
    });
}

/// Benchmark throttling a burst for one symbol.
fn bench_throttle_burst(c: &mut Criterion) {
    let routed = RoutedTick {
        tick: tick(dec!(187.25)),
        routing_reason: RoutingReason::PrimaryActive,
    };

    c.bench_function("throttle_burst_100", |b| {
        b.iter(|| {
            let mut throttle = SymbolThrottle::new(Duration::from_millis(50));
            let start = Instant::now();
            for _ in 0..100 {
                throttle.offer(black_box(routed.clone()), start);
            }
            let _due = throttle.take_due(start + Duration::from_millis(50));
        });
    });
}

criterion_group!(
    benches,
    bench_normalize_quote,
    bench_validate,
    bench_route,
    bench_throttle_burst,
);
criterion_main!(benches);

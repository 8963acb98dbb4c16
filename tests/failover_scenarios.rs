//! Failover Scenarios - Router Behaviour Over Scripted Health Histories
//!
//! Drives `DataSourceRouter` with explicit timestamps: health events
//! are recorded at fixed instants and evaluation cycles run at
//! one-second steps, so every scenario is reproducible.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use market_feed_router::adapters::metrics::RouterMetrics;
use market_feed_router::domain::failover::{RouterState, Transition};
use market_feed_router::domain::health::{ConnectionState, HealthTracker};
use market_feed_router::domain::tick::{NormalizedTick, RoutingReason, SourceId};
use market_feed_router::domain::validator::{Rejection, TickValidator};
use market_feed_router::usecases::router::{DataSourceRouter, ServiceStatus};

use SourceId::{Fallback, Primary};

// ── Helpers ──

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap() + chrono::Duration::seconds(secs)
}

struct Scenario {
    router: DataSourceRouter,
    health: Arc<HealthTracker>,
    metrics: Arc<RouterMetrics>,
}

impl Scenario {
    /// One-second evaluation, ten-second grace, thirty-second staleness.
    fn new() -> Self {
        let health = Arc::new(HealthTracker::new(Duration::from_secs(30)));
        let metrics = Arc::new(RouterMetrics::new().unwrap());
        let router = DataSourceRouter::new(
            Arc::clone(&health),
            Arc::clone(&metrics),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        Self { router, health, metrics }
    }

    /// Both sources connected at t=0, first cycle run at t=1.
    fn healthy() -> Self {
        let s = Self::new();
        s.ok(Primary, 0);
        s.ok(Fallback, 0);
        assert!(s.eval(1).is_none());
        s
    }

    fn ok(&self, source: SourceId, at: i64) {
        self.health.record_success_at(source, t(at));
    }

    fn fail(&self, source: SourceId, times: u32, at: i64) {
        for _ in 0..times {
            self.health.record_failure_at(source, "connection reset", t(at));
        }
    }

    fn eval(&self, at: i64) -> Option<Transition> {
        self.router.evaluate_at(t(at))
    }

    fn fail_over(&self, at: i64) {
        self.fail(Primary, 3, at);
        self.ok(Fallback, at);
        assert_eq!(self.eval(at + 1).unwrap().to, RouterState::FallbackActive);
    }

    fn reason(&self, source: SourceId) -> Option<RoutingReason> {
        self.router.route(tick(source)).map(|r| r.routing_reason)
    }
}

fn tick(source: SourceId) -> NormalizedTick {
    NormalizedTick {
        symbol: "US:AAPL".to_string(),
        price: dec!(187.25),
        volume: None,
        timestamp: t(0),
        source,
        sequence: 1,
    }
}

// ── Failover ──

#[test]
fn test_three_failures_fail_over_within_one_cycle() {
    let s = Scenario::healthy();

    s.fail(Primary, 2, 2);
    assert!(s.eval(3).is_none(), "degraded primary keeps routing");
    assert_eq!(s.reason(Primary), Some(RoutingReason::PrimaryActive));

    s.fail(Primary, 1, 3);
    s.ok(Fallback, 3);
    let tr = s.eval(4).unwrap();
    assert_eq!((tr.from, tr.to), (RouterState::PrimaryActive, RouterState::FallbackActive));
    assert_eq!(tr.primary.consecutive_failures, 3);

    assert_eq!(s.reason(Fallback), Some(RoutingReason::FallbackFailover));
    assert_eq!(s.reason(Primary), None);
}

#[test]
fn test_silent_primary_fails_over_without_errors() {
    let s = Scenario::healthy();

    // Fallback keeps polling, primary goes quiet.
    for at in (5..=30).step_by(5) {
        s.ok(Fallback, at);
        assert!(s.eval(at).is_none());
    }

    s.ok(Fallback, 31);
    let tr = s.eval(31).unwrap();
    assert_eq!(tr.to, RouterState::FallbackActive);
    assert_eq!(tr.primary.state, ConnectionState::Disconnected);
    assert_eq!(tr.primary.consecutive_failures, 0);
}

// ── Grace period ──

#[test]
fn test_recovery_waits_out_grace_period() {
    let s = Scenario::healthy();
    s.fail_over(2);

    s.ok(Primary, 4);
    s.ok(Fallback, 4);
    assert_eq!(s.eval(5).unwrap().to, RouterState::GracePeriod);

    // Fallback stays authoritative for the whole window.
    for at in 6..15 {
        s.ok(Primary, at);
        s.ok(Fallback, at);
        assert!(s.eval(at).is_none());
        assert_eq!(s.reason(Fallback), Some(RoutingReason::FallbackGracePeriod));
        assert_eq!(s.reason(Primary), None);
    }

    s.ok(Primary, 15);
    let tr = s.eval(15).unwrap();
    assert_eq!((tr.from, tr.to), (RouterState::GracePeriod, RouterState::PrimaryActive));
    assert_eq!(s.reason(Primary), Some(RoutingReason::PrimaryActive));
    assert_eq!(s.reason(Fallback), None);
}

#[test]
fn test_degraded_primary_aborts_grace() {
    let s = Scenario::healthy();
    s.fail_over(2);

    s.ok(Primary, 4);
    s.ok(Fallback, 4);
    assert_eq!(s.eval(5).unwrap().to, RouterState::GracePeriod);

    s.fail(Primary, 1, 7);
    s.ok(Fallback, 7);
    let tr = s.eval(8).unwrap();
    assert_eq!((tr.from, tr.to), (RouterState::GracePeriod, RouterState::FallbackActive));
    assert_eq!(tr.primary.state, ConnectionState::Degraded);

    // Degraded is not connected: no new grace period yet.
    assert!(s.eval(9).is_none());
    assert_eq!(s.reason(Fallback), Some(RoutingReason::FallbackFailover));
}

#[test]
fn test_flapping_primary_never_reaches_primary_active() {
    let s = Scenario::healthy();
    s.fail_over(2);

    let mut states = Vec::new();
    for cycle in 0..20 {
        let at = 4 + cycle * 2;
        s.ok(Primary, at);
        s.ok(Fallback, at);
        if let Some(tr) = s.eval(at) {
            states.push(tr.to);
        }
        s.fail(Primary, 1, at + 1);
        s.ok(Primary, at + 1);
        if let Some(tr) = s.eval(at + 1) {
            states.push(tr.to);
        }
    }

    assert!(!states.contains(&RouterState::PrimaryActive));
    assert!(states.contains(&RouterState::GracePeriod));
    assert_eq!(s.router.state(), RouterState::FallbackActive);
}

#[test]
fn test_fallback_loss_during_grace_promotes_primary() {
    let s = Scenario::healthy();
    s.fail_over(2);

    s.ok(Primary, 4);
    assert_eq!(s.eval(5).unwrap().to, RouterState::GracePeriod);

    s.ok(Primary, 6);
    s.fail(Fallback, 3, 6);
    let tr = s.eval(7).unwrap();
    assert_eq!(tr.to, RouterState::PrimaryActive);
}

// ── Both unavailable ──

#[test]
fn test_both_down_then_primary_recovers_directly() {
    let s = Scenario::healthy();
    s.fail_over(2);

    s.fail(Fallback, 3, 4);
    s.fail(Primary, 1, 4);
    let tr = s.eval(5).unwrap();
    assert_eq!(tr.to, RouterState::BothUnavailable);
    assert_eq!(s.reason(Primary), None);
    assert_eq!(s.reason(Fallback), None);
    assert_eq!(s.router.health_snapshot_at(t(5)).status, ServiceStatus::Unavailable);

    s.ok(Primary, 6);
    let tr = s.eval(7).unwrap();
    assert_eq!((tr.from, tr.to), (RouterState::BothUnavailable, RouterState::PrimaryActive));
    assert_eq!(s.router.health_snapshot_at(t(7)).status, ServiceStatus::Healthy);
}

#[test]
fn test_both_down_then_fallback_recovers_first() {
    let s = Scenario::healthy();
    s.fail_over(2);
    s.fail(Fallback, 3, 4);
    assert_eq!(s.eval(5).unwrap().to, RouterState::BothUnavailable);

    s.ok(Fallback, 6);
    let tr = s.eval(7).unwrap();
    assert_eq!(tr.to, RouterState::FallbackActive);
    assert_eq!(s.router.health_snapshot_at(t(7)).status, ServiceStatus::Degraded);

    // Primary comes back later through the normal grace path.
    s.ok(Primary, 8);
    s.ok(Fallback, 8);
    assert_eq!(s.eval(9).unwrap().to, RouterState::GracePeriod);
}

// ── Determinism and metrics ──

#[test]
fn test_replaying_history_gives_same_transitions() {
    fn replay() -> Vec<(RouterState, RouterState, DateTime<Utc>)> {
        let s = Scenario::healthy();
        let mut out = Vec::new();
        let mut push = |tr: Option<Transition>| {
            if let Some(tr) = tr {
                out.push((tr.from, tr.to, tr.at));
            }
        };

        s.fail(Primary, 3, 2);
        s.ok(Fallback, 2);
        push(s.eval(3));
        s.ok(Primary, 4);
        s.ok(Fallback, 4);
        push(s.eval(5));
        s.fail(Primary, 1, 6);
        push(s.eval(7));
        s.fail(Fallback, 3, 8);
        s.fail(Primary, 2, 8);
        push(s.eval(9));
        s.ok(Primary, 10);
        push(s.eval(11));
        out
    }

    let first = replay();
    assert_eq!(first, replay());
    assert_eq!(first.len(), 5);
    assert_eq!(first.last().unwrap().1, RouterState::PrimaryActive);
}

#[test]
fn test_transitions_are_counted() {
    let s = Scenario::healthy();
    s.fail_over(2);

    let counted = s
        .metrics
        .state_transitions
        .with_label_values(&["PRIMARY_ACTIVE", "FALLBACK_ACTIVE"])
        .get();
    assert_eq!(counted, 1);
    assert_eq!(s.metrics.router_state.get(), 1);
}

// ── Validation ──

#[test]
fn test_breaker_rejects_fast_jump_and_allows_slow_one() {
    let v = TickValidator::default();
    let mut prev = tick(Primary);
    prev.price = dec!(100);

    let mut fast = tick(Primary);
    fast.price = dec!(125);
    fast.timestamp = t(0) + chrono::Duration::milliseconds(500);
    assert_eq!(v.validate_at(&fast, Some(&prev), t(1)), Err(Rejection::PriceCircuitBreaker));

    let mut slow = fast.clone();
    slow.timestamp = t(2);
    assert_eq!(v.validate_at(&slow, Some(&prev), t(2)), Ok(()));
}

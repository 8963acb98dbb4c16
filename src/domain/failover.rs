//! Failover State Machine - Source Selection with Hysteresis
//!
//! Pure transition logic for the router. Given both sources' health
//! snapshots and the current time, decides at most one transition
//! per evaluation. Edges:
//!
//! ```text
//! PRIMARY_ACTIVE   --primary DISCONNECTED-------------------> FALLBACK_ACTIVE
//! FALLBACK_ACTIVE  --primary CONNECTED----------------------> GRACE_PERIOD
//! FALLBACK_ACTIVE  --fallback DISCONNECTED, primary down----> BOTH_UNAVAILABLE
//! GRACE_PERIOD     --grace elapsed, primary stayed up-------> PRIMARY_ACTIVE
//! GRACE_PERIOD     --fallback DISCONNECTED, primary up------> PRIMARY_ACTIVE
//! GRACE_PERIOD     --primary DEGRADED/DISCONNECTED----------> FALLBACK_ACTIVE
//! BOTH_UNAVAILABLE --primary CONNECTED----------------------> PRIMARY_ACTIVE
//! BOTH_UNAVAILABLE --fallback CONNECTED---------------------> FALLBACK_ACTIVE
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chrono_span;
use super::health::{ConnectionState, SourceHealth};
use super::tick::{RoutingReason, SourceId};

/// Router mode. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RouterState {
    PrimaryActive = 0,
    FallbackActive = 1,
    GracePeriod = 2,
    BothUnavailable = 3,
}

impl RouterState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryActive => "PRIMARY_ACTIVE",
            Self::FallbackActive => "FALLBACK_ACTIVE",
            Self::GracePeriod => "GRACE_PERIOD",
            Self::BothUnavailable => "BOTH_UNAVAILABLE",
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of `as_u8`. Unknown values map to `BothUnavailable`.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::PrimaryActive,
            1 => Self::FallbackActive,
            2 => Self::GracePeriod,
            _ => Self::BothUnavailable,
        }
    }

    /// Whether a tick from `source` is forwarded in this state, and why.
    pub const fn route(self, source: SourceId) -> Option<RoutingReason> {
        match (self, source) {
            (Self::PrimaryActive, SourceId::Primary) => Some(RoutingReason::PrimaryActive),
            (Self::FallbackActive, SourceId::Fallback) => Some(RoutingReason::FallbackFailover),
            (Self::GracePeriod, SourceId::Fallback) => Some(RoutingReason::FallbackGracePeriod),
            _ => None,
        }
    }
}

impl std::fmt::Display for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state change, with the health that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RouterState,
    pub to: RouterState,
    pub at: DateTime<Utc>,
    pub primary: SourceHealth,
    pub fallback: SourceHealth,
}

/// The failover state machine.
///
/// Owned by a single evaluator; never shared mutably.
#[derive(Debug, Clone)]
pub struct FailoverMachine {
    state: RouterState,
    grace_started_at: Option<DateTime<Utc>>,
    grace_period: Duration,
}

impl FailoverMachine {
    /// Starts optimistically in `PrimaryActive`.
    pub const fn new(grace_period: Duration) -> Self {
        Self {
            state: RouterState::PrimaryActive,
            grace_started_at: None,
            grace_period,
        }
    }

    pub const fn state(&self) -> RouterState {
        self.state
    }

    pub const fn grace_started_at(&self) -> Option<DateTime<Utc>> {
        self.grace_started_at
    }

    /// Evaluate one cycle. Returns the transition taken, if any.
    pub fn evaluate(
        &mut self,
        primary: &SourceHealth,
        fallback: &SourceHealth,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let next = self.next_state(primary, fallback, now)?;

        let transition = Transition {
            from: self.state,
            to: next,
            at: now,
            primary: primary.clone(),
            fallback: fallback.clone(),
        };

        self.state = next;
        self.grace_started_at = (next == RouterState::GracePeriod).then_some(now);

        Some(transition)
    }

    fn next_state(
        &self,
        primary: &SourceHealth,
        fallback: &SourceHealth,
        now: DateTime<Utc>,
    ) -> Option<RouterState> {
        use ConnectionState::{Connected, Disconnected};

        match self.state {
            RouterState::PrimaryActive => {
                (primary.state == Disconnected).then_some(RouterState::FallbackActive)
            }
            RouterState::FallbackActive => {
                if primary.state == Connected {
                    Some(RouterState::GracePeriod)
                } else if fallback.state == Disconnected && primary.state == Disconnected {
                    Some(RouterState::BothUnavailable)
                } else {
                    None
                }
            }
            RouterState::GracePeriod => {
                let started = self.grace_started_at.unwrap_or(now);

                // Any failure inside the window counts, even one that a
                // later success already cleared between evaluations.
                if primary.state != Connected || primary.failed_since(started) {
                    return Some(RouterState::FallbackActive);
                }

                let elapsed = now - started >= chrono_span(self.grace_period);
                if elapsed || fallback.state == Disconnected {
                    Some(RouterState::PrimaryActive)
                } else {
                    None
                }
            }
            RouterState::BothUnavailable => {
                if primary.state == Connected {
                    Some(RouterState::PrimaryActive)
                } else if fallback.state == Connected {
                    Some(RouterState::FallbackActive)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn health(source: SourceId, state: ConnectionState) -> SourceHealth {
        let mut h = SourceHealth::new(source);
        h.state = state;
        if state != ConnectionState::Connected {
            h.consecutive_failures = if state == ConnectionState::Disconnected { 3 } else { 1 };
        }
        h
    }

    fn up(source: SourceId) -> SourceHealth {
        health(source, ConnectionState::Connected)
    }

    fn down(source: SourceId) -> SourceHealth {
        health(source, ConnectionState::Disconnected)
    }

    fn degraded(source: SourceId) -> SourceHealth {
        health(source, ConnectionState::Degraded)
    }

    const P: SourceId = SourceId::Primary;
    const F: SourceId = SourceId::Fallback;

    fn machine() -> FailoverMachine {
        FailoverMachine::new(Duration::from_secs(10))
    }

    #[test]
    fn test_starts_primary_active() {
        assert_eq!(machine().state(), RouterState::PrimaryActive);
    }

    #[test]
    fn test_degraded_primary_does_not_fail_over() {
        let mut m = machine();
        assert!(m.evaluate(&degraded(P), &up(F), t(0)).is_none());
        assert_eq!(m.state(), RouterState::PrimaryActive);
    }

    #[test]
    fn test_failover_on_primary_disconnect() {
        let mut m = machine();
        let tr = m.evaluate(&down(P), &up(F), t(0)).unwrap();
        assert_eq!(tr.from, RouterState::PrimaryActive);
        assert_eq!(tr.to, RouterState::FallbackActive);
        assert_eq!(tr.primary.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_grace_then_primary() {
        let mut m = machine();
        m.evaluate(&down(P), &up(F), t(0));
        let tr = m.evaluate(&up(P), &up(F), t(1)).unwrap();
        assert_eq!(tr.to, RouterState::GracePeriod);
        assert_eq!(m.grace_started_at(), Some(t(1)));

        assert!(m.evaluate(&up(P), &up(F), t(10)).is_none());
        let tr = m.evaluate(&up(P), &up(F), t(11)).unwrap();
        assert_eq!(tr.to, RouterState::PrimaryActive);
        assert_eq!(m.grace_started_at(), None);
    }

    #[test]
    fn test_grace_aborted_by_degraded_primary() {
        let mut m = machine();
        m.evaluate(&down(P), &up(F), t(0));
        m.evaluate(&up(P), &up(F), t(1));
        let tr = m.evaluate(&degraded(P), &up(F), t(3)).unwrap();
        assert_eq!(tr.from, RouterState::GracePeriod);
        assert_eq!(tr.to, RouterState::FallbackActive);
    }

    #[test]
    fn test_grace_aborted_by_blip_between_evaluations() {
        let mut m = machine();
        m.evaluate(&down(P), &up(F), t(0));
        m.evaluate(&up(P), &up(F), t(1));

        let mut blipped = up(P);
        blipped.last_failure_at = Some(t(2));
        let tr = m.evaluate(&blipped, &up(F), t(3)).unwrap();
        assert_eq!(tr.to, RouterState::FallbackActive);
    }

    #[test]
    fn test_grace_promotes_early_when_fallback_dies() {
        let mut m = machine();
        m.evaluate(&down(P), &up(F), t(0));
        m.evaluate(&up(P), &up(F), t(1));
        let tr = m.evaluate(&up(P), &down(F), t(2)).unwrap();
        assert_eq!(tr.to, RouterState::PrimaryActive);
    }

    #[test]
    fn test_both_unavailable_and_recovery_paths() {
        let mut m = machine();
        m.evaluate(&down(P), &down(F), t(0));
        assert_eq!(m.state(), RouterState::FallbackActive);
        m.evaluate(&down(P), &down(F), t(1));
        assert_eq!(m.state(), RouterState::BothUnavailable);
        assert!(m.evaluate(&down(P), &down(F), t(2)).is_none());

        m.evaluate(&down(P), &up(F), t(3));
        assert_eq!(m.state(), RouterState::FallbackActive);

        let mut m = machine();
        m.evaluate(&down(P), &down(F), t(0));
        m.evaluate(&down(P), &down(F), t(1));
        let tr = m.evaluate(&up(P), &up(F), t(2)).unwrap();
        assert_eq!(tr.to, RouterState::PrimaryActive, "primary recovery skips grace");
    }

    #[test]
    fn test_fallback_active_holds_with_degraded_primary_and_dead_fallback() {
        let mut m = machine();
        m.evaluate(&down(P), &up(F), t(0));
        assert!(m.evaluate(&degraded(P), &down(F), t(1)).is_none());
        assert_eq!(m.state(), RouterState::FallbackActive);
    }

    #[test]
    fn test_route_table() {
        use RouterState::*;
        assert_eq!(PrimaryActive.route(P), Some(RoutingReason::PrimaryActive));
        assert_eq!(PrimaryActive.route(F), None);
        assert_eq!(FallbackActive.route(F), Some(RoutingReason::FallbackFailover));
        assert_eq!(FallbackActive.route(P), None);
        assert_eq!(GracePeriod.route(F), Some(RoutingReason::FallbackGracePeriod));
        assert_eq!(GracePeriod.route(P), None);
        assert_eq!(BothUnavailable.route(P), None);
        assert_eq!(BothUnavailable.route(F), None);
    }

    #[test]
    fn test_u8_round_trip() {
        for s in [
            RouterState::PrimaryActive,
            RouterState::FallbackActive,
            RouterState::GracePeriod,
            RouterState::BothUnavailable,
        ] {
            assert_eq!(RouterState::from_u8(s.as_u8()), s);
        }
    }
}

//! Health Tracker - Per-Source Connection Verdicts
//!
//! One `SourceHealth` record per source, each behind its own lock.
//! Adapters write (success / failure events), the router reads
//! consistent snapshots. Failures never decay on a timer: only an
//! explicit success clears them. Silence is handled separately by
//! the staleness rule applied in `snapshot`.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chrono_span;
use super::tick::SourceId;

/// Consecutive failures at which a source is considered gone.
pub const DISCONNECT_AFTER_FAILURES: u32 = 3;

/// Connection verdict for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Degraded,
    Disconnected,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Degraded => "DEGRADED",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    /// Numeric form for gauges (2 = connected, 1 = degraded, 0 = disconnected).
    pub const fn gauge_value(self) -> i64 {
        match self {
            Self::Connected => 2,
            Self::Degraded => 1,
            Self::Disconnected => 0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling health record for one source.
///
/// Invariant: `state == Connected` implies `consecutive_failures == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: SourceId,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceHealth {
    /// Fresh record: nothing heard yet, so disconnected.
    pub const fn new(source: SourceId) -> Self {
        Self {
            source,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
        }
    }

    fn apply_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.state = ConnectionState::Connected;
        self.last_success_at = Some(at);
    }

    fn apply_failure(&mut self, error: String, at: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.state = if self.consecutive_failures >= DISCONNECT_AFTER_FAILURES {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Degraded
        };
        self.last_failure_at = Some(at);
        self.last_error = Some(error);
    }

    /// Whether no success has been seen within `stale_timeout` of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_timeout: Duration) -> bool {
        self.last_success_at
            .is_none_or(|at| now - at > chrono_span(stale_timeout))
    }

    /// Whether a failure was recorded strictly after `since`.
    pub fn failed_since(&self, since: DateTime<Utc>) -> bool {
        self.last_failure_at.is_some_and(|at| at > since)
    }
}

/// Shared, lock-protected health state for both sources.
///
/// Passed around as `Arc<HealthTracker>`; never exposes a mutable
/// reference to its records.
#[derive(Debug)]
pub struct HealthTracker {
    records: [RwLock<SourceHealth>; 2],
    stale_timeout: Duration,
}

impl HealthTracker {
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            records: [
                RwLock::new(SourceHealth::new(SourceId::Primary)),
                RwLock::new(SourceHealth::new(SourceId::Fallback)),
            ],
            stale_timeout,
        }
    }

    pub const fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Record a successful event (tick, heartbeat, poll, connect) now.
    pub fn record_success(&self, source: SourceId) {
        self.record_success_at(source, Utc::now());
    }

    pub fn record_success_at(&self, source: SourceId, at: DateTime<Utc>) {
        self.records[source.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_success(at);
    }

    /// Record a failed event now.
    pub fn record_failure(&self, source: SourceId, error: impl Into<String>) {
        self.record_failure_at(source, error, Utc::now());
    }

    pub fn record_failure_at(&self, source: SourceId, error: impl Into<String>, at: DateTime<Utc>) {
        self.records[source.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_failure(error.into(), at);
    }

    /// The recorded health, exactly as last written.
    pub fn get_health(&self, source: SourceId) -> SourceHealth {
        self.records[source.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Health as the router sees it at `now`.
    ///
    /// A source silent for longer than the stale timeout reads as
    /// disconnected. The stored record is left untouched, so the next
    /// success restores it immediately.
    pub fn snapshot(&self, source: SourceId, now: DateTime<Utc>) -> SourceHealth {
        let mut health = self.get_health(source);
        if health.state != ConnectionState::Disconnected && health.is_stale(now, self.stale_timeout) {
            health.state = ConnectionState::Disconnected;
            health.last_error = Some(format!(
                "stale: no data for more than {}ms",
                self.stale_timeout.as_millis()
            ));
        }
        health
    }
}

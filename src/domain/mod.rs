//! Domain layer - Routing core logic and models.
//!
//! Pure logic for the market data router: tick shapes, validation,
//! per-source health, the failover state machine and the reconnect
//! backoff policy. No I/O here (hexagonal architecture inner ring);
//! every time-dependent rule takes its clock reading as a parameter.

pub mod backoff;
pub mod failover;
pub mod health;
pub mod tick;
pub mod validator;

pub use backoff::Backoff;
pub use failover::{FailoverMachine, RouterState, Transition};
pub use health::{ConnectionState, HealthTracker, SourceHealth};
pub use tick::{AssetClass, NormalizedTick, RoutedTick, RoutingReason, SourceId};
pub use validator::{Rejection, TickValidator, ValidatorConfig};

/// Convert a std duration into a chrono span, saturating at a century.
pub(crate) fn chrono_span(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

//! Use Cases Layer - Routing Workflows
//!
//! Orchestrates domain logic with port interfaces to implement the
//! service's core workflows.
//!
//! Use cases:
//! - `DataSourceRouter`: failover evaluation loop + tick routing loop
//! - `BroadcastFanout`: per-symbol throttle and subscriber delivery

pub mod fanout;
pub mod router;

pub use fanout::{BroadcastFanout, Subscription, SubscriptionFilter};
pub use router::{DataSourceRouter, HealthSnapshot, RouterInputs, ServiceStatus};

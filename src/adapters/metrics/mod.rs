//! Metrics and Monitoring Adapters
//!
//! Provides Prometheus metrics export on :9090 and health check
//! endpoints (/live, /ready, /health) via axum 0.7.

pub mod health;
pub mod prometheus;

pub use self::health::HealthServer;
pub use self::prometheus::RouterMetrics;

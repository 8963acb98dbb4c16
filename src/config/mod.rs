//! Configuration Module - TOML-based Router Configuration
//!
//! Loads and validates configuration from `config.toml`. Every
//! threshold the routing core uses is externalized here; nothing
//! is hardcoded in the domain layer beyond its defaults.

pub mod loader;

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::domain::tick::AssetClass;
use crate::domain::validator::ValidatorConfig;
use crate::ports::CatalogEntry;

/// Top-level router configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any task is spawned.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Failover evaluation and queueing.
  #[serde(default)]
  pub router: RouterConfig,
  /// Tick sanity thresholds.
  #[serde(default)]
  pub validation: ValidationConfig,
  /// Reconnect backoff shared by both adapters.
  #[serde(default)]
  pub reconnect: ReconnectConfig,
  /// Fan-out throttling and subscriber queues.
  #[serde(default)]
  pub fanout: FanoutConfig,
  /// Streaming primary source.
  pub primary: PrimaryConfig,
  /// Polling fallback source.
  pub fallback: FallbackConfig,
  /// Symbol catalog refresh.
  #[serde(default)]
  pub catalog: CatalogConfig,
  /// Metrics and health endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Routed tick tape.
  #[serde(default)]
  pub recorder: RecorderConfig,
  /// Tracked instruments.
  #[serde(default)]
  pub symbols: Vec<SymbolConfig>,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Router evaluation loop and queue sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
  /// Period of the failover evaluation loop.
  pub evaluation_interval_ms: u64,
  /// Hysteresis window before failing back to the primary.
  pub grace_period_ms: u64,
  /// Silence after which a source counts as disconnected.
  pub stale_timeout_ms: u64,
  /// Capacity of each adapter → router queue.
  pub queue_capacity: usize,
  /// Capacity of the router → fan-out queue.
  pub output_capacity: usize,
}

/// Validator thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
  /// Maximum jump (percent) tolerated inside the breaker interval.
  pub circuit_breaker_threshold_pct: Decimal,
  /// Breaker only applies to ticks closer together than this.
  pub min_interval_for_breaker_ms: u64,
  /// How far in the future a tick timestamp may be.
  pub max_future_skew_ms: u64,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
  /// First retry ceiling.
  pub base_reconnect_delay_ms: u64,
  /// Upper bound for any retry delay.
  pub max_reconnect_delay_ms: u64,
}

/// Broadcast fan-out configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
  /// Minimum gap between two publishes of the same symbol.
  pub throttle_interval_ms: u64,
  /// Per-subscriber outbound queue size.
  pub subscriber_queue_capacity: usize,
  /// How long a full subscriber queue may stall a publish.
  pub publish_timeout_ms: u64,
}

/// Streaming primary source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryConfig {
  /// WebSocket endpoint.
  pub ws_url: String,
  /// Venue prefix for unqualified symbols.
  #[serde(default = "default_venue")]
  pub venue: String,
  /// Read idle timeout; 0 means "use the stale timeout".
  #[serde(default)]
  pub idle_timeout_ms: u64,
}

/// Polling fallback source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
  /// REST base URL.
  pub base_url: String,
  /// Venue prefix for unqualified symbols.
  #[serde(default = "default_venue")]
  pub venue: String,
  /// Gap between polls while healthy.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_ms: u64,
  /// Bound on a single poll.
  #[serde(default = "default_request_timeout")]
  pub request_timeout_ms: u64,
  /// Upstream request budget.
  #[serde(default = "default_max_requests")]
  pub max_requests_per_minute: u32,
}

/// Symbol catalog refresh configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
  /// How often adapters re-read the tracked symbol list.
  pub refresh_interval_secs: u64,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  pub enabled: bool,
  /// Metrics server bind address.
  pub bind_address: String,
  /// Health check endpoint port.
  pub health_port: u16,
}

/// JSONL tick tape configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
  /// Record every routed tick to `data_dir/ticks/`.
  pub enabled: bool,
  /// Base directory for tape files.
  pub data_dir: String,
}

/// One tracked instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
  /// Symbol, with or without venue prefix.
  pub symbol: String,
  /// Asset class for subscription scoping.
  pub asset_class: AssetClass,
  /// Whether the instrument is tracked.
  #[serde(default = "default_true")]
  pub active: bool,
}

impl RouterConfig {
  pub const fn evaluation_interval(&self) -> Duration {
    Duration::from_millis(self.evaluation_interval_ms)
  }

  pub const fn grace_period(&self) -> Duration {
    Duration::from_millis(self.grace_period_ms)
  }

  pub const fn stale_timeout(&self) -> Duration {
    Duration::from_millis(self.stale_timeout_ms)
  }
}

impl ValidationConfig {
  /// Thresholds in the validator's own terms.
  pub const fn validator_config(&self) -> ValidatorConfig {
    ValidatorConfig {
      circuit_breaker_threshold_pct: self.circuit_breaker_threshold_pct,
      min_interval_for_breaker: Duration::from_millis(self.min_interval_for_breaker_ms),
      max_future_skew: Duration::from_millis(self.max_future_skew_ms),
    }
  }
}

impl ReconnectConfig {
  pub const fn base_delay(&self) -> Duration {
    Duration::from_millis(self.base_reconnect_delay_ms)
  }

  pub const fn max_delay(&self) -> Duration {
    Duration::from_millis(self.max_reconnect_delay_ms)
  }
}

impl FanoutConfig {
  pub const fn throttle_interval(&self) -> Duration {
    Duration::from_millis(self.throttle_interval_ms)
  }

  pub const fn publish_timeout(&self) -> Duration {
    Duration::from_millis(self.publish_timeout_ms)
  }
}

impl FallbackConfig {
  pub const fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub const fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

impl CatalogConfig {
  pub const fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs)
  }
}

impl AppConfig {
  /// Primary read idle timeout, defaulting to the stale timeout.
  pub const fn primary_idle_timeout(&self) -> Duration {
    if self.primary.idle_timeout_ms == 0 {
      self.router.stale_timeout()
    } else {
      Duration::from_millis(self.primary.idle_timeout_ms)
    }
  }

  /// Configured instruments as catalog entries, venue-qualified
  /// with the primary's venue.
  pub fn catalog_entries(&self) -> Vec<CatalogEntry> {
    self
      .symbols
      .iter()
      .filter_map(|s| {
        let symbol = crate::domain::tick::normalize_symbol(&s.symbol, &self.primary.venue)?;
        Some(CatalogEntry {
          symbol,
          asset_class: s.asset_class,
          active: s.active,
        })
      })
      .collect()
  }
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      evaluation_interval_ms: 1_000,
      grace_period_ms: 10_000,
      stale_timeout_ms: 30_000,
      queue_capacity: 1_000,
      output_capacity: 4_096,
    }
  }
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self {
      circuit_breaker_threshold_pct: dec!(20),
      min_interval_for_breaker_ms: 1_000,
      max_future_skew_ms: 300_000,
    }
  }
}

impl Default for ReconnectConfig {
  fn default() -> Self {
    Self {
      base_reconnect_delay_ms: 1_000,
      max_reconnect_delay_ms: 30_000,
    }
  }
}

impl Default for FanoutConfig {
  fn default() -> Self {
    Self {
      throttle_interval_ms: 50,
      subscriber_queue_capacity: 256,
      publish_timeout_ms: 100,
    }
  }
}

impl Default for CatalogConfig {
  fn default() -> Self {
    Self {
      refresh_interval_secs: 300,
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: "0.0.0.0:9090".to_string(),
      health_port: 8080,
    }
  }
}

impl Default for RecorderConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      data_dir: "data".to_string(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_venue() -> String {
  "US".to_string()
}

fn default_poll_interval() -> u64 {
  5_000
}

fn default_request_timeout() -> u64 {
  3_000
}

fn default_max_requests() -> u32 {
  60
}

//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.
//! A configuration error is the only fatal error class: the
//! process refuses to start.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    symbols = config.symbols.len(),
    evaluation_interval_ms = config.router.evaluation_interval_ms,
    grace_period_ms = config.router.grace_period_ms,
    stale_timeout_ms = config.router.stale_timeout_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive durations and capacities
/// - Consistent backoff bounds
/// - A breaker threshold in (0, 100]
/// - Grace and stale windows wider than one evaluation cycle
/// - Non-empty endpoints and at least one active symbol
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.service.name.trim().is_empty(),
    "service.name must not be empty"
  );

  // Router validation
  let router = &config.router;
  anyhow::ensure!(
    router.evaluation_interval_ms > 0,
    "router.evaluation_interval_ms must be positive"
  );
  anyhow::ensure!(
    router.grace_period_ms >= router.evaluation_interval_ms,
    "router.grace_period_ms ({}) must be at least evaluation_interval_ms ({})",
    router.grace_period_ms,
    router.evaluation_interval_ms
  );
  anyhow::ensure!(
    router.stale_timeout_ms > router.evaluation_interval_ms,
    "router.stale_timeout_ms ({}) must exceed evaluation_interval_ms ({})",
    router.stale_timeout_ms,
    router.evaluation_interval_ms
  );
  anyhow::ensure!(
    router.queue_capacity > 0 && router.output_capacity > 0,
    "router queue capacities must be positive"
  );

  // Validation thresholds
  let validation = &config.validation;
  anyhow::ensure!(
    validation.circuit_breaker_threshold_pct > Decimal::ZERO
      && validation.circuit_breaker_threshold_pct <= dec!(100),
    "validation.circuit_breaker_threshold_pct must be in (0, 100], got {}",
    validation.circuit_breaker_threshold_pct
  );
  anyhow::ensure!(
    validation.min_interval_for_breaker_ms > 0,
    "validation.min_interval_for_breaker_ms must be positive"
  );
  anyhow::ensure!(
    validation.max_future_skew_ms > 0,
    "validation.max_future_skew_ms must be positive"
  );

  // Reconnect validation
  let reconnect = &config.reconnect;
  anyhow::ensure!(
    reconnect.base_reconnect_delay_ms > 0,
    "reconnect.base_reconnect_delay_ms must be positive"
  );
  anyhow::ensure!(
    reconnect.base_reconnect_delay_ms <= reconnect.max_reconnect_delay_ms,
    "reconnect.base_reconnect_delay_ms ({}) must not exceed max_reconnect_delay_ms ({})",
    reconnect.base_reconnect_delay_ms,
    reconnect.max_reconnect_delay_ms
  );

  // Fan-out validation
  let fanout = &config.fanout;
  anyhow::ensure!(
    fanout.throttle_interval_ms > 0,
    "fanout.throttle_interval_ms must be positive"
  );
  anyhow::ensure!(
    fanout.subscriber_queue_capacity > 0,
    "fanout.subscriber_queue_capacity must be positive"
  );
  anyhow::ensure!(
    fanout.publish_timeout_ms > 0,
    "fanout.publish_timeout_ms must be positive"
  );

  // Source validation
  anyhow::ensure!(
    !config.primary.ws_url.is_empty(),
    "primary.ws_url must not be empty"
  );
  anyhow::ensure!(
    !config.fallback.base_url.is_empty(),
    "fallback.base_url must not be empty"
  );
  anyhow::ensure!(
    config.fallback.poll_interval_ms > 0 && config.fallback.request_timeout_ms > 0,
    "fallback poll interval and request timeout must be positive"
  );
  anyhow::ensure!(
    config.fallback.max_requests_per_minute > 0,
    "fallback.max_requests_per_minute must be positive"
  );
  anyhow::ensure!(
    config.catalog.refresh_interval_secs > 0,
    "catalog.refresh_interval_secs must be positive"
  );

  anyhow::ensure!(
    !config.recorder.enabled || !config.recorder.data_dir.trim().is_empty(),
    "recorder.data_dir must not be empty when the recorder is enabled"
  );

  // Symbol validation
  for (i, symbol) in config.symbols.iter().enumerate() {
    anyhow::ensure!(
      crate::domain::tick::normalize_symbol(&symbol.symbol, &config.primary.venue).is_some(),
      "Symbol {} ({:?}) is not a valid symbol",
      i,
      symbol.symbol
    );
  }
  anyhow::ensure!(
    config.symbols.iter().any(|s| s.active),
    "At least one active symbol must be configured"
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
    [service]
    name = "router-test"

    [primary]
    ws_url = "wss://stream.example.com/v1"

    [fallback]
    base_url = "https://quotes.example.com"

    [[symbols]]
    symbol = "aapl"
    asset_class = "equity"
  "#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.router.evaluation_interval_ms, 1_000);
    assert_eq!(config.router.grace_period_ms, 10_000);
    assert_eq!(config.router.stale_timeout_ms, 30_000);
    assert_eq!(config.validation.circuit_breaker_threshold_pct, dec!(20));
    assert_eq!(config.validation.min_interval_for_breaker_ms, 1_000);
    assert_eq!(config.fanout.throttle_interval_ms, 50);
    assert_eq!(config.reconnect.base_reconnect_delay_ms, 1_000);
    assert_eq!(config.reconnect.max_reconnect_delay_ms, 30_000);
    assert_eq!(config.primary_idle_timeout(), config.router.stale_timeout());

    let entries = config.catalog_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].symbol, "US:AAPL");
  }

  #[test]
  fn test_rejects_inverted_backoff() {
    let text = format!(
      "{MINIMAL}\n[reconnect]\nbase_reconnect_delay_ms = 5000\nmax_reconnect_delay_ms = 1000\n"
    );
    let err = parse_config(&text).unwrap_err();
    assert!(err.to_string().contains("base_reconnect_delay_ms"));
  }

  #[test]
  fn test_rejects_zero_threshold() {
    let text = format!("{MINIMAL}\n[validation]\ncircuit_breaker_threshold_pct = 0\n");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_rejects_grace_shorter_than_evaluation() {
    let text = format!("{MINIMAL}\n[router]\nevaluation_interval_ms = 1000\ngrace_period_ms = 500\n");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_rejects_negative_timeout() {
    let text = format!("{MINIMAL}\n[router]\nstale_timeout_ms = -5\n");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_requires_active_symbol() {
    let text = MINIMAL.replace("asset_class = \"equity\"", "asset_class = \"equity\"\nactive = false");
    let err = parse_config(&text).unwrap_err();
    assert!(err.to_string().contains("active symbol"));
  }
}

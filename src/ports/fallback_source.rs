//! Fallback Source Port - Polled Snapshot Interface
//!
//! Defines the trait for the secondary feed, queried on a timer.
//! Each poll returns the latest snapshot for the requested symbols.

use async_trait::async_trait;
use serde::Deserialize;

use super::SourceError;

/// One polled price snapshot, before normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTick {
  /// Upstream symbol (may lack a venue prefix).
  pub symbol: String,
  /// Last price.
  pub price: f64,
  /// Session volume, if reported.
  #[serde(default)]
  pub volume: Option<f64>,
  /// Quote time (Unix ms). Receipt time is used when absent.
  #[serde(default)]
  pub timestamp_ms: Option<i64>,
}

/// Trait for the polling (fallback) market data provider.
#[async_trait]
pub trait FallbackSource: Send + Sync + 'static {
  /// Fetch the latest snapshot for `symbols` (venue-qualified).
  ///
  /// Symbols the upstream does not know are simply absent from
  /// the result; that is not an error.
  async fn poll(&self, symbols: &[String]) -> Result<Vec<RawTick>, SourceError>;
}

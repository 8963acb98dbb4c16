//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the routing core requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `PrimarySource`: Low-latency streaming feed
//! - `FallbackSource`: Polled snapshot feed
//! - `PriceSink`: Downstream delivery of routed ticks
//! - `SymbolCatalog`: Tracked instruments and asset classes

pub mod fallback_source;
pub mod price_sink;
pub mod primary_source;
pub mod symbol_catalog;

use std::time::Duration;

use thiserror::Error;

pub use fallback_source::{FallbackSource, RawTick};
pub use price_sink::PriceSink;
pub use primary_source::{PrimarySource, RawMessage};
pub use symbol_catalog::{CatalogEntry, SymbolCatalog};

/// Transport-level failure reported by a source.
///
/// Adapters map every variant except `Malformed` to a health
/// failure; a malformed message is skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
  #[error("connection failed: {0}")]
  Connect(String),

  #[error("not connected")]
  NotConnected,

  #[error("subscribe failed: {0}")]
  Subscribe(String),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("malformed message: {0}")]
  Malformed(String),

  #[error("timed out after {0:?}")]
  Timeout(Duration),
}

impl SourceError {
  /// Whether this error says anything about connection health.
  pub const fn is_health_relevant(&self) -> bool {
    !matches!(self, Self::Malformed(_))
  }
}

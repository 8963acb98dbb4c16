//! Symbol Catalog Port - Tracked Instrument Interface
//!
//! Supplies the instruments to subscribe to and their asset
//! classes. Read-only from this crate's point of view; consulted at
//! adapter start and on periodic refresh.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::tick::AssetClass;

/// One instrument known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
  /// Venue-qualified symbol.
  pub symbol: String,
  /// Asset class, used for subscription scoping.
  pub asset_class: AssetClass,
  /// Whether the instrument is currently tracked.
  pub active: bool,
}

/// Trait for symbol catalog providers.
#[async_trait]
pub trait SymbolCatalog: Send + Sync + 'static {
  /// All catalog entries, active or not.
  async fn entries(&self) -> anyhow::Result<Vec<CatalogEntry>>;

  /// Active symbols only, sorted and de-duplicated.
  async fn active_symbols(&self) -> anyhow::Result<Vec<String>> {
    let mut symbols: Vec<String> = self
      .entries()
      .await?
      .into_iter()
      .filter(|e| e.active)
      .map(|e| e.symbol)
      .collect();
    symbols.sort();
    symbols.dedup();
    Ok(symbols)
  }
}

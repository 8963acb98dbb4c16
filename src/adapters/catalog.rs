//! Static Symbol Catalog - Config-backed Instrument List
//!
//! `SymbolCatalog` served from the `[[symbols]]` config section.
//! Entries can be swapped at runtime; adapters pick the new set up
//! on their next catalog refresh.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::config::AppConfig;
use crate::ports::symbol_catalog::{CatalogEntry, SymbolCatalog};

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct StaticSymbolCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
}

impl StaticSymbolCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Catalog of the configured symbols, venue-qualified.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.catalog_entries())
    }

    /// Replace every entry.
    pub fn replace(&self, entries: Vec<CatalogEntry>) {
        info!(count = entries.len(), "Symbol catalog replaced");
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
    }

    /// Current entries without going through the async port.
    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SymbolCatalog for StaticSymbolCatalog {
    async fn entries(&self) -> anyhow::Result<Vec<CatalogEntry>> {
        Ok(self.snapshot())
    }
}

//! Core tick types shared by adapters, router and fan-out.
//!
//! A `NormalizedTick` is the single shape every upstream feed is
//! reduced to. The router wraps accepted ticks into `RoutedTick`s,
//! tagged with why they were forwarded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifies which upstream feed produced a tick or health record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceId {
    /// Low-latency streaming feed.
    Primary,
    /// Polling feed used when the primary is unavailable.
    Fallback,
}

impl SourceId {
    /// Both sources, in priority order.
    pub const ALL: [Self; 2] = [Self::Primary, Self::Fallback];

    /// Lowercase label used for metrics and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Fallback => 1,
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "PRIMARY"),
            Self::Fallback => write!(f, "FALLBACK"),
        }
    }
}

/// Asset class used for subscription scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Crypto,
    Forex,
    Index,
    Commodity,
}

/// One validated price observation from a single source.
///
/// Immutable once built by an adapter. `sequence` is strictly
/// increasing per symbol within one source and is never compared
/// across sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTick {
    /// Uppercase, venue-qualified symbol (e.g. "NASDAQ:AAPL").
    pub symbol: String,
    /// Observed price, always positive once validated.
    pub price: Decimal,
    /// Traded or quoted volume, when the feed reports one.
    pub volume: Option<Decimal>,
    /// Source-reported observation time.
    pub timestamp: DateTime<Utc>,
    /// Feed that produced this tick.
    pub source: SourceId,
    /// Per-symbol, per-source ordering counter.
    pub sequence: u64,
}

/// Why the router forwarded a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingReason {
    #[serde(rename = "primary-active")]
    PrimaryActive,
    #[serde(rename = "fallback-failover")]
    FallbackFailover,
    #[serde(rename = "fallback-grace-period")]
    FallbackGracePeriod,
}

impl RoutingReason {
    /// Tag carried on the wire and in metrics labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryActive => "primary-active",
            Self::FallbackFailover => "fallback-failover",
            Self::FallbackGracePeriod => "fallback-grace-period",
        }
    }
}

impl std::fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tick the router accepted as authoritative.
///
/// Handed to the fan-out by value; nothing is shared between the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedTick {
    #[serde(flatten)]
    pub tick: NormalizedTick,
    pub routing_reason: RoutingReason,
}

impl RoutedTick {
    pub fn symbol(&self) -> &str {
        &self.tick.symbol
    }

    pub const fn source(&self) -> SourceId {
        self.tick.source
    }
}

/// Normalize a raw symbol into `VENUE:TICKER` form.
///
/// Already-qualified symbols keep their own venue. Returns `None`
/// for empty input.
pub fn normalize_symbol(raw: &str, default_venue: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_uppercase();
    match upper.split_once(':') {
        Some((venue, ticker)) if !venue.is_empty() && !ticker.is_empty() => Some(upper),
        Some(_) => None,
        None => Some(format!("{}:{upper}", default_venue.trim().to_uppercase())),
    }
}

/// Strip the venue prefix, leaving the bare ticker sent to upstream APIs.
pub fn bare_ticker(symbol: &str) -> &str {
    symbol.split_once(':').map_or(symbol, |(_, ticker)| ticker)
}

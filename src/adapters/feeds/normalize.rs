//! Wire Normalization - Raw Upstream Shapes to NormalizedTick
//!
//! One normalization step per source. Everything downstream sees
//! the fixed `NormalizedTick` shape:
//! - Trade: price as-is, size as volume
//! - Quote: mid price, bid_size + ask_size as volume
//! - Bar: close price, bar volume
//! - Polled snapshot: price as-is, receipt time if no timestamp
//!
//! Upstreams are asked for bare tickers, so unqualified symbols in
//! their replies are mapped back to the tracked catalog symbol before
//! the adapter's default venue is applied.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use thiserror::Error;

use crate::domain::tick::{NormalizedTick, SourceId, bare_ticker, normalize_symbol};
use crate::ports::fallback_source::RawTick;
use crate::ports::primary_source::RawMessage;

/// Raw data that cannot be turned into a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("invalid symbol {0:?}")]
    Symbol(String),

    #[error("{field} is not a finite number for {symbol}")]
    NonFinite { symbol: String, field: &'static str },

    #[error("timestamp {0}ms out of range")]
    Timestamp(i64),

    #[error("{field} overflows the decimal range for {symbol}")]
    Overflow { symbol: String, field: &'static str },
}

/// Maps upstream symbols to the venue-qualified symbols the adapter tracks.
#[derive(Debug, Clone, Default)]
pub struct SymbolResolver {
    /// Venue for unqualified symbols the catalog does not know.
    venue: String,
    /// Bare ticker to tracked symbol.
    by_ticker: HashMap<String, String>,
}

impl SymbolResolver {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            by_ticker: HashMap::new(),
        }
    }

    /// Replace the tracked set. When two tracked symbols share a bare
    /// ticker, the one on the default venue wins.
    pub fn track(&mut self, symbols: &[String]) {
        let default_prefix = format!("{}:", self.venue.trim().to_uppercase());
        self.by_ticker.clear();
        for symbol in symbols {
            let Some(qualified) = normalize_symbol(symbol, &self.venue) else {
                continue;
            };
            let ticker = bare_ticker(&qualified).to_string();
            let on_default = qualified.starts_with(&default_prefix);
            match self.by_ticker.get(&ticker) {
                Some(existing) if existing.starts_with(&default_prefix) || !on_default => {}
                _ => {
                    self.by_ticker.insert(ticker, qualified);
                }
            }
        }
    }

    /// Venue-qualified symbol for an upstream symbol.
    ///
    /// Qualified symbols are kept. Unqualified ones resolve to the
    /// tracked symbol with the same ticker, else to the default venue.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let qualified = normalize_symbol(raw, &self.venue)?;
        if raw.contains(':') {
            return Some(qualified);
        }
        Some(
            self.by_ticker
                .get(bare_ticker(&qualified))
                .cloned()
                .unwrap_or(qualified),
        )
    }
}

/// A normalized observation still waiting for its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTick {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl PendingTick {
    pub fn into_tick(self, source: SourceId, sequence: u64) -> NormalizedTick {
        NormalizedTick {
            symbol: self.symbol,
            price: self.price,
            volume: self.volume,
            timestamp: self.timestamp,
            source,
            sequence,
        }
    }
}

/// Normalize one streaming message. Heartbeats yield `Ok(None)`.
pub fn normalize_primary(
    message: &RawMessage,
    symbols: &SymbolResolver,
) -> Result<Option<PendingTick>, NormalizeError> {
    let pending = match message {
        RawMessage::Heartbeat => return Ok(None),
        RawMessage::Trade {
            symbol,
            price,
            size,
            timestamp_ms,
        } => {
            let symbol = symbol_of(symbol, symbols)?;
            PendingTick {
                price: decimal(*price, &symbol, "price")?,
                volume: size.map(|v| decimal(v, &symbol, "size")).transpose()?,
                timestamp: timestamp(*timestamp_ms)?,
                symbol,
            }
        }
        RawMessage::Quote {
            symbol,
            bid,
            ask,
            bid_size,
            ask_size,
            timestamp_ms,
        } => {
            let symbol = symbol_of(symbol, symbols)?;
            let bid = decimal(*bid, &symbol, "bid")?;
            let ask = decimal(*ask, &symbol, "ask")?;
            let volume = match (bid_size, ask_size) {
                (Some(b), Some(a)) => {
                    let b = decimal(*b, &symbol, "bid_size")?;
                    let a = decimal(*a, &symbol, "ask_size")?;
                    Some(checked(b.checked_add(a), &symbol, "volume")?)
                }
                _ => None,
            };
            let mid = bid
                .checked_add(ask)
                .and_then(|sum| sum.checked_div(Decimal::TWO));
            PendingTick {
                price: checked(mid, &symbol, "price")?,
                volume,
                timestamp: timestamp(*timestamp_ms)?,
                symbol,
            }
        }
        RawMessage::Bar {
            symbol,
            close,
            volume,
            end_ms,
        } => {
            let symbol = symbol_of(symbol, symbols)?;
            PendingTick {
                price: decimal(*close, &symbol, "close")?,
                volume: volume.map(|v| decimal(v, &symbol, "volume")).transpose()?,
                timestamp: timestamp(*end_ms)?,
                symbol,
            }
        }
    };

    Ok(Some(pending))
}

/// Normalize one polled snapshot, stamping `received_at` when the
/// upstream gave no time.
pub fn normalize_fallback(
    raw: &RawTick,
    symbols: &SymbolResolver,
    received_at: DateTime<Utc>,
) -> Result<PendingTick, NormalizeError> {
    let symbol = symbol_of(&raw.symbol, symbols)?;
    Ok(PendingTick {
        price: decimal(raw.price, &symbol, "price")?,
        volume: raw
            .volume
            .map(|v| decimal(v, &symbol, "volume"))
            .transpose()?,
        timestamp: raw.timestamp_ms.map_or(Ok(received_at), timestamp)?,
        symbol,
    })
}

fn symbol_of(raw: &str, symbols: &SymbolResolver) -> Result<String, NormalizeError> {
    symbols
        .resolve(raw)
        .ok_or_else(|| NormalizeError::Symbol(raw.to_string()))
}

fn checked(
    value: Option<Decimal>,
    symbol: &str,
    field: &'static str,
) -> Result<Decimal, NormalizeError> {
    value.ok_or_else(|| NormalizeError::Overflow {
        symbol: symbol.to_string(),
        field,
    })
}

fn decimal(value: f64, symbol: &str, field: &'static str) -> Result<Decimal, NormalizeError> {
    Decimal::from_f64(value).ok_or_else(|| NormalizeError::NonFinite {
        symbol: symbol.to_string(),
        field,
    })
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, NormalizeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(NormalizeError::Timestamp(ms))
}

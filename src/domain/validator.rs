//! Price Record Validator - Per-Tick Sanity Rules
//!
//! Pure function of (tick, previous tick, clock). Rules run in a
//! fixed order and the first failure wins:
//! 1. non-positive price
//! 2. negative volume
//! 3. timestamp too far in the future
//! 4. price circuit breaker (large jump within a short interval)

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use super::chrono_span;
use super::tick::NormalizedTick;

/// Why a tick was rejected. `Display` yields the reason tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Rejection {
    #[error("non-positive-price")]
    NonPositivePrice,
    #[error("negative-volume")]
    NegativeVolume,
    #[error("future-timestamp")]
    FutureTimestamp,
    #[error("price-circuit-breaker")]
    PriceCircuitBreaker,
}

impl Rejection {
    /// Reason tag, stable for logs and metric labels.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::NonPositivePrice => "non-positive-price",
            Self::NegativeVolume => "negative-volume",
            Self::FutureTimestamp => "future-timestamp",
            Self::PriceCircuitBreaker => "price-circuit-breaker",
        }
    }
}

/// Validator thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Maximum relative jump, in percent, allowed inside `min_interval_for_breaker`.
    pub circuit_breaker_threshold_pct: Decimal,
    /// Jumps larger than the threshold are only rejected when closer together than this.
    pub min_interval_for_breaker: Duration,
    /// How far ahead of the local clock a timestamp may be.
    pub max_future_skew: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold_pct: dec!(20),
            min_interval_for_breaker: Duration::from_secs(1),
            max_future_skew: Duration::from_secs(300),
        }
    }
}

/// Stateless tick validator.
///
/// Holds only its thresholds, so one instance can be shared freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickValidator {
    config: ValidatorConfig,
}

impl TickValidator {
    pub const fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate `tick` against the wall clock.
    pub fn validate(
        &self,
        tick: &NormalizedTick,
        previous: Option<&NormalizedTick>,
    ) -> Result<(), Rejection> {
        self.validate_at(tick, previous, Utc::now())
    }

    /// Validate `tick` as if the local clock read `now`.
    ///
    /// `previous` is only consulted when it refers to the same symbol.
    pub fn validate_at(
        &self,
        tick: &NormalizedTick,
        previous: Option<&NormalizedTick>,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if tick.price <= Decimal::ZERO {
            return Err(Rejection::NonPositivePrice);
        }

        if tick.volume.is_some_and(|v| v < Decimal::ZERO) {
            return Err(Rejection::NegativeVolume);
        }

        if tick.timestamp - now > chrono_span(self.config.max_future_skew) {
            return Err(Rejection::FutureTimestamp);
        }

        if let Some(prev) = previous.filter(|p| p.symbol == tick.symbol) {
            if self.trips_breaker(tick, prev) {
                return Err(Rejection::PriceCircuitBreaker);
            }
        }

        Ok(())
    }

    fn trips_breaker(&self, tick: &NormalizedTick, prev: &NormalizedTick) -> bool {
        if prev.price <= Decimal::ZERO {
            return false;
        }

        // A jump too large to represent is beyond any threshold.
        let jump_pct = tick
            .price
            .checked_sub(prev.price)
            .and_then(|diff| diff.abs().checked_div(prev.price))
            .and_then(|ratio| ratio.checked_mul(dec!(100)));
        if jump_pct.is_some_and(|pct| pct <= self.config.circuit_breaker_threshold_pct) {
            return false;
        }

        // Out-of-order timestamps give a negative gap, which is below any interval.
        tick.timestamp - prev.timestamp < chrono_span(self.config.min_interval_for_breaker)
    }
}

//! Price Sink Adapters
//!
//! Concrete `PriceSink`s driven by the fan-out:
//! - `TracingPriceSink`: routed ticks as debug log events
//! - `TickTape`: append-only daily JSONL files

pub mod log;
pub mod tape;

pub use self::log::TracingPriceSink;
pub use self::tape::TickTape;

//! Market Data Feed Adapters - Source Ingest and Lifecycle
//!
//! Provides the two source adapters and their concrete upstreams:
//! - Primary: streaming adapter over any `PrimarySource`
//!   (`WsStreamSource` for JSON WebSockets)
//! - Fallback: polling adapter over any `FallbackSource`
//!   (`HttpPollSource` for the REST quote endpoint)
//! - Ingest: normalize, validate, de-duplicate, report health, hand off
//! - Task Supervisor: spawns both adapters with their router queues

pub mod fallback;
pub mod http_poll;
pub mod ingest;
pub mod normalize;
pub mod primary;
pub mod task_supervisor;
pub mod ws_stream;

pub use fallback::{FallbackAdapter, FallbackAdapterSettings};
pub use http_poll::HttpPollSource;
pub use ingest::{IngestOutcome, TickIngest};
pub use normalize::{NormalizeError, PendingTick};
pub use primary::{PrimaryAdapter, PrimaryAdapterSettings};
pub use task_supervisor::FeedSupervisor;
pub use ws_stream::WsStreamSource;

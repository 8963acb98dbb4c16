//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, HTTP clients, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `catalog`: config-backed symbol catalog
//! - `feeds`: primary and fallback source adapters and upstreams
//! - `metrics`: Prometheus metrics export and health checks
//! - `sinks`: price sinks (tracing, JSONL tick tape)

pub mod catalog;
pub mod feeds;
pub mod metrics;
pub mod sinks;

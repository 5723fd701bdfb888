//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: request_id, session, view, ...)
//!     → metrics.rs (counters, histograms) when metrics are enabled
//!
//! Consumers:
//!     → logging.rs subscriber (pretty in development, JSON otherwise)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Request id and session id flow through every request-scoped event
//! - Metric updates are skipped when disabled

pub mod logging;
pub mod metrics;

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → access_log.rs (one structured line per dispatched request)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, text or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Request ID (UUID v4) is attached to every per-request event
//! - Metrics are cheap (atomic increments) and no-ops without an exporter

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::AccessLogStage;
pub use metrics::{RequestMetricsStage, UpstreamMetricsStage};

//! Logging and metrics.
//!
//! # Data Flow
//! ```text
//! setup middleware  → request log line + render_requests_total / duration
//! worker host       → render_worker_pending gauge
//! build driver      → render_build_tasks_total by task kind
//!     → tracing-subscriber fmt layer (stdout)
//!     → Prometheus exporter (only when metrics_enabled)
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Recording a metric with no exporter installed is a no-op

pub mod logging;
pub mod metrics;

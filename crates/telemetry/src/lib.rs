//! Telemetry for the venue analytics service.
//!
//! Metrics live in-process and are flushed by the worker into the
//! `performance_samples` table, so the service reports on itself through
//! its own performance dashboard.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;

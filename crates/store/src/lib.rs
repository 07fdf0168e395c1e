//! SQLite storage for the venue analytics pipeline.
//!
//! One database holds raw events, sessions, searches, performance samples,
//! daily rollups, aggregation bookkeeping and the admin audit log. WAL mode
//! lets dashboard reads proceed while the collector writes.

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod health;
pub mod query;
pub mod retention;
pub mod rollup;
pub mod schema;
pub mod sessions;
pub mod writer;

pub use client::*;
pub use config::*;
pub use error::{StoreError, StoreResult};
pub use export::{csv_line, ExportRow};
pub use query::*;
pub use rollup::{AggregationRun, RollupStore, RUN_COMPLETED, RUN_RUNNING};
pub use writer::AnalyticsWriter;

//! Background work for venue analytics.
//!
//! - Aggregator: closes past days into rollups, one run per date at a time
//! - Scheduler: aggregation loop, session sweep, metrics flush
//! - Retention: purge executor behind the admin endpoint

pub mod aggregator;
pub mod retention;
pub mod scheduler;

pub use aggregator::*;
pub use retention::RetentionWorker;
pub use scheduler::*;

//! Request-facing services composed from the store and collaborators.

pub mod collector;
pub mod dashboard;
pub mod export;
pub mod realtime;
pub mod sessions;

pub use collector::{CollectOutcome, EventCollector};
pub use dashboard::{DashboardService, DayEntry, EntityDashboard, GlobalDashboard, PerformanceDashboard, RankedEntity};
pub use export::{ExportService, PreparedExport};
pub use realtime::{RealtimeEngine, RealtimeSnapshot};
pub use sessions::SessionTracker;

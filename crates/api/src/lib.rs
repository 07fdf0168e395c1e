//! HTTP layer for the venue analytics pipeline.
//!
//! Public `/track/*` endpoints feed the event collector behind a per-IP
//! rate limiter; admin `/analytics/*` endpoints serve dashboards, exports
//! and operator controls, each recorded in the audit log.

pub mod catalog;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

pub use catalog::{Catalog, CatalogEntry, HttpCatalog, StaticCatalog};
pub use routes::router;
pub use state::{AppState, AuthClient};

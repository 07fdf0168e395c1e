//! Core types, limits, and validation for the venue analytics pipeline.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod limits;
pub mod retention;
pub mod session;
pub mod stats;

pub use audit::*;
pub use auth::*;
pub use config::*;
pub use error::{Error, Result};
pub use error::{AuthErrorCode, DbErrorCode, RateLimitErrorCode, ValidationErrorCode};
pub use events::*;
pub use export::*;
pub use retention::*;
pub use session::*;
pub use stats::*;

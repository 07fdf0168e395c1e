//! Request middleware.

pub mod performance;
pub mod rate_limit;

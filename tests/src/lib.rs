//! Shared harness for end-to-end tests against the real router and an
//! in-memory SQLite store.

pub mod fixtures;
pub mod mocks;
pub mod setup;

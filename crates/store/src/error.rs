//! Storage errors.

use analytics_core::{DbErrorCode, Error};
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A stored value could not be mapped back to a domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Sqlx(sqlx::Error::PoolTimedOut) => {
                Error::database(DbErrorCode::Timeout, err.to_string())
            }
            _ => Error::database(DbErrorCode::Unavailable, err.to_string()),
        }
    }
}

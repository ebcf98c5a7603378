//! Error type surfaced by the dedup store.
//!
//! Callers treat every variant as a storage failure: the entry it concerned
//! is not considered delivered.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

//! Persistence seams: the candidate table, the ranking-job table, and resume object storage.
//!
//! Each seam is an `async_trait` so the pipeline can run against Postgres/S3 in
//! production and in-memory doubles in tests.

pub mod candidates;
pub mod objects;
pub mod ranking_jobs;

use thiserror::Error;

pub use candidates::{CandidateStore, PgCandidateStore};
pub use objects::{ObjectStore, S3ObjectStore, StorageError};
pub use ranking_jobs::{PgRankingJobStore, RankingJobStore};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (one candidate per email).
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

//! Error types for archive jobs.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::ArchiveStatus;
use crate::store::StoreError;

/// Result alias for the archiving core.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors surfaced by `Convert`, `GetContent` and the retry path.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The request itself is unusable.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown or deleted record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The primary page could not be fetched.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Directory or file write failed while archiving.
    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file recorded in a completed archive is missing or unreadable.
    #[error("archived file unreadable at {}: {source}", path.display())]
    Integrity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Content was requested for a record that has not completed.
    #[error("archive {id} is not complete (status: {})", status.as_str())]
    NotComplete { id: i64, status: ArchiveStatus },

    #[error("invalid status transition from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        from: ArchiveStatus,
        to: ArchiveStatus,
    },

    /// The job was cancelled or ran past its deadline.
    #[error("{0}")]
    Cancelled(String),

    /// The record store failed.
    #[error("record store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ArchiveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("archive record {id}")),
            other => Self::Store(other),
        }
    }
}

/// Failure of a single asset download. Never fatal to the job.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

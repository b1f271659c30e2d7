//! # Error Module
//!
//! Error types for the catalog pipeline.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Smallest retryable unit** - a bad file fails that file, a bad batch fails that batch
//! - **Include context** - root names, relative paths, header keys

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Catalog store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors that occur while walking a root
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Root '{root}' not found at {path}")]
    RootNotFound { root: String, path: PathBuf },

    #[error("Root '{root}' is not a directory: {path}")]
    RootNotDirectory { root: String, path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read entry in {path}: {source}")]
    ReadEntry {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Scan was cancelled")]
    Cancelled,
}

/// Errors that occur while reading header cards from a file
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read header of {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Header of {path} has no END card")]
    Truncated { path: String },

    #[error("Card {key} has a non-printable value")]
    NonPrintable { key: String },
}

/// Errors raised by a catalog store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open catalog database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Unknown root: {0}")]
    UnknownRoot(String),

    #[error("Catalog lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, ref message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::DuplicateKey(message.clone().unwrap_or_else(|| e.to_string()))
            }
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, CatalogError>;

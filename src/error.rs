//! Error types for the diagscrub cleaning engine.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants map to
//! the failure classes a caller has to tell apart: a bad source archive is
//! fatal for that archive only, a failed cleanup is advisory, and a bad
//! persisted mapping record is skipped by the loader.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cleaning operations.
#[derive(Debug, Error)]
pub enum CleanerError {
    /// The source archive could not be unpacked
    #[error("Failed to extract {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// A permission fix on one extracted entry failed
    #[error("Could not adjust permissions on {path}: {source}")]
    PermissionAdjust {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Building the obfuscated archive failed
    #[error("Failed to re-compress {path}: {message}")]
    Recompression { path: PathBuf, message: String },

    /// The extracted tree could not be removed after compression
    #[error("Failed to remove extraction directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted mapping record was malformed
    #[error("Invalid {category} mapping record '{real}': {reason}")]
    MappingLoad {
        category: String,
        real: String,
        reason: String,
    },

    /// No unused synthetic value could be produced
    #[error("Synthetic value space exhausted for {category} mapping")]
    MappingExhausted { category: String },

    /// An archive operation was called in the wrong lifecycle state
    #[error("Invalid archive state: {0}")]
    InvalidState(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A user supplied pattern failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Whole-archive timeout
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CleanerError {
    /// True for errors that must not abort the surrounding operation.
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            CleanerError::PermissionAdjust { .. }
                | CleanerError::Cleanup { .. }
                | CleanerError::MappingLoad { .. }
        )
    }
}

/// Result type alias for cleaning operations
pub type Result<T> = std::result::Result<T, CleanerError>;

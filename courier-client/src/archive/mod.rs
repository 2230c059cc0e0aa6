//! Archive layer for Courier.
//!
//! Persists [`ArchivedState`] checkpoints between launches. Archiving is
//! best-effort: the dispatch loop logs failures and carries on, and a
//! failed load is treated as a first launch.

mod file;
mod memory;

pub use file::FileArchive;
pub use memory::MemoryArchive;

use async_trait::async_trait;
use courier_core::ArchivedState;
use std::path::PathBuf;
use std::time::Duration;

/// Archive errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Reading or writing the archive file failed.
    #[error("archive I/O error at {path}: {source}")]
    Io {
        /// Archive location.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The checkpoint could not be encoded or decoded.
    #[error("archive serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation did not finish in time.
    #[error("archive operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend refused the operation.
    #[error("archive unavailable: {0}")]
    Unavailable(String),
}

/// Trait for checkpoint storage backends.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Load the last checkpoint.
    ///
    /// Returns `None` if nothing has been archived yet.
    async fn load(&self) -> Result<Option<ArchivedState>, ArchiveError>;

    /// Replace the stored checkpoint.
    async fn save(&self, state: &ArchivedState) -> Result<(), ArchiveError>;
}

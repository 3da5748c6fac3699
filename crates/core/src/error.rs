//! Boundary error for file operations

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of an atomic write or of starting a watch session.
///
/// Always carries the originating I/O error as its `source()`.
#[derive(Debug, Error)]
#[error("{message}: {}", .path.display())]
pub struct FileOperationError {
    message: String,
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl FileOperationError {
    pub fn new(message: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    /// Human-readable description of the failed step
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Path the operation was acting on
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Kind of the underlying I/O error
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// Underlying I/O error
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}

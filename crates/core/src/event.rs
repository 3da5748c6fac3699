//! Change event model
//!
//! A `ChangeEvent` is created once per detected transition and never mutated
//! afterwards; a new transition produces a new event.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Type of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// File appeared
    Created,
    /// File content or metadata changed
    Modified,
    /// File disappeared
    Deleted,
    /// File appeared as the destination of a rename
    Renamed,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Created => "created",
            OperationType::Modified => "modified",
            OperationType::Deleted => "deleted",
            OperationType::Renamed => "renamed",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed filesystem change
///
/// Invariant: a `Deleted` event is never streaming and carries no size.
/// The timestamp is fixed when the event is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    file_path: PathBuf,
    operation_type: OperationType,
    timestamp: SystemTime,
    is_streaming: bool,
    size_bytes: Option<u64>,
    previous_size: Option<u64>,
    renamed_from: Option<PathBuf>,
    sequence: u64,
}

impl ChangeEvent {
    /// Create an event stamped with the current time
    ///
    /// `is_streaming` and `size_bytes` are ignored for `Deleted`.
    pub fn new(
        file_path: impl Into<PathBuf>,
        operation_type: OperationType,
        is_streaming: bool,
        size_bytes: Option<u64>,
    ) -> Self {
        let deleted = operation_type == OperationType::Deleted;
        Self {
            file_path: file_path.into(),
            operation_type,
            timestamp: SystemTime::now(),
            is_streaming: is_streaming && !deleted,
            size_bytes: if deleted { None } else { size_bytes },
            previous_size: None,
            renamed_from: None,
            sequence: 0,
        }
    }

    /// Create a deletion event
    pub fn deleted(file_path: impl Into<PathBuf>) -> Self {
        Self::new(file_path, OperationType::Deleted, false, None)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_previous_size(mut self, previous_size: Option<u64>) -> Self {
        self.previous_size = previous_size;
        self
    }

    pub fn with_renamed_from(mut self, renamed_from: Option<PathBuf>) -> Self {
        self.renamed_from = renamed_from;
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Instant of detection
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// True while the writer still appears to be active
    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Size observed at detection time (`None` for deletions)
    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    /// Size before the current change began; `None` for new files
    pub fn previous_size(&self) -> Option<u64> {
        self.previous_size
    }

    /// Net size change since the current change began
    pub fn size_delta(&self) -> Option<i64> {
        match (self.previous_size, self.size_bytes) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64),
            _ => None,
        }
    }

    /// Source path of a rename, when the notification source reported it
    pub fn renamed_from(&self) -> Option<&Path> {
        self.renamed_from.as_deref()
    }

    /// Position of this event within its watch session
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

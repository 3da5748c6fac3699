//! Core types for Settle
//!
//! This crate provides:
//! - `ChangeEvent` values describing observed filesystem transitions
//! - Crash-safe atomic file replacement (temp file + fsync + rename)
//! - Recognition of editor and atomic-writer temporary files
//! - The `FileOperationError` boundary error

pub mod atomic;
pub mod error;
pub mod event;
pub mod temp;

// Re-exports
pub use atomic::{atomic_write, AtomicWriter, StagedWrite};
pub use error::FileOperationError;
pub use event::{ChangeEvent, OperationType};
pub use temp::{extract_base_name, is_temp_file};

/// Result type for file operations
pub type Result<T> = std::result::Result<T, FileOperationError>;

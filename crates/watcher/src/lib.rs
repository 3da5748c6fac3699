//! File change observation for Settle
//!
//! This crate provides:
//! - Streaming-write detection (size/mtime sampling until a file is stable)
//! - Per-path debouncing with immediate deletions
//! - Single-file, multi-file and directory watch sessions with explicit stop
//! - Optional native OS notifications as a low-latency hint source
//! - Recognition of multi-step operations such as atomic saves
//!
//! ```no_run
//! use settle_watcher::{DetectorConfig, FileOperationDetector};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let detector = FileOperationDetector::new(DetectorConfig::default())?;
//! let mut session = detector.watch_directory("/etc/app", Some(".yaml"))?;
//!
//! while let Some(event) = session.next_event().await {
//!     if !event.is_streaming() {
//!         println!("{} {}", event.operation_type(), event.file_path().display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debounce;
pub mod detector;
pub mod filter;
pub mod operations;
pub mod platform;
pub mod scan;
pub mod streaming;
pub mod target;

// Re-exports
pub use config::{ConfigError, DetectorConfig, OperationConfig};
pub use debounce::Debouncer;
pub use detector::{FileOperationDetector, StopHandle, WatchSession};
pub use filter::WatchFilter;
pub use operations::{
    FileOperation, OperationDetector, OperationEvent, OperationKind, OperationPattern, OperationWatch,
};
pub use platform::{RawKind, RawNotification};
pub use settle_core::{ChangeEvent, FileOperationError, OperationType};
pub use streaming::{Classification, Sample, StreamingStateTracker, Transition};
pub use target::WatchTarget;

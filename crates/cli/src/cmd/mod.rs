//! CLI command implementations

pub mod watch;
pub mod write;

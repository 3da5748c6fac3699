//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use settle_watcher::WatchTarget;
use std::time::SystemTime;

/// Parse octal permission bits such as `600`, `0644` or `0o755`
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim_start_matches("0o");
    let bits = u32::from_str_radix(digits, 8)
        .with_context(|| format!("Invalid octal mode: {}", mode))?;
    if bits > 0o7777 {
        anyhow::bail!("Mode out of range: {}", mode);
    }
    Ok(bits)
}

/// Format size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Local wall-clock time with milliseconds, for terminal output
pub fn format_clock(ts: SystemTime) -> String {
    DateTime::<Local>::from(ts).format("%H:%M:%S%.3f").to_string()
}

/// RFC 3339 UTC timestamp, for JSON output
pub fn format_rfc3339(ts: SystemTime) -> String {
    DateTime::<Utc>::from(ts).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One-line description of a watch target
pub fn describe_target(target: &WatchTarget) -> String {
    match target {
        WatchTarget::File(path) => path.display().to_string(),
        WatchTarget::Files(paths) => format!("{} files", paths.len()),
        WatchTarget::Directory {
            path,
            suffix,
            recursive,
        } => {
            let mut desc = path.display().to_string();
            if *recursive {
                desc.push_str("/**");
            }
            if let Some(suffix) = suffix {
                desc.push_str(&format!(" (*{})", suffix));
            }
            desc
        }
    }
}

//! Watch files or a directory and print change events

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use settle_watcher::{
    ChangeEvent, DetectorConfig, FileOperation, FileOperationDetector, OperationKind, OperationType,
    WatchTarget,
};
use std::path::PathBuf;
use tracing::debug;

pub struct WatchArgs {
    pub paths: Vec<PathBuf>,
    pub dir: Option<PathBuf>,
    pub suffix: Option<String>,
    pub recursive: bool,
    pub config: Option<PathBuf>,
    pub poll_only: bool,
    pub complete_only: bool,
    pub json: bool,
    pub operations: bool,
}

pub async fn run(args: WatchArgs) -> Result<()> {
    // 1. Load configuration
    let mut config = match &args.config {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DetectorConfig::default(),
    };
    if args.poll_only {
        config.native_events = false;
    }

    // 2. Start the session
    let detector = FileOperationDetector::new(config).context("Invalid detector configuration")?;
    if args.operations {
        return watch_operations(&detector, &args).await;
    }
    let mut session = detector
        .watch_target(build_target(&args))
        .context("Failed to start watching")?;

    // 3. Ctrl-C ends the session cleanly
    let handle = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, stopping");
            handle.stop();
        }
    });

    if !args.json {
        eprintln!(
            "{} {}",
            "Watching".bold(),
            util::describe_target(session.target()).cyan()
        );
    }

    // 4. Print events until stopped
    while let Some(event) = session.next_event().await {
        if args.complete_only && event.is_streaming() {
            continue;
        }
        if args.json {
            println!("{}", event_json(&event));
        } else {
            print_event(&event);
        }
    }

    Ok(())
}

async fn watch_operations(detector: &FileOperationDetector, args: &WatchArgs) -> Result<()> {
    let dir = args.dir.as_ref().context("--operations needs --dir")?;
    let mut watch = detector
        .watch_operations(dir, args.recursive)
        .context("Failed to start operation detection")?;

    if !args.json {
        eprintln!(
            "{} operations in {}",
            "Watching".bold(),
            watch.root().display().cyan()
        );
    }

    loop {
        let operation = tokio::select! {
            operation = watch.next_operation() => operation,
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted, stopping");
                None
            }
        };
        let Some(operation) = operation else {
            break;
        };
        if args.json {
            println!("{}", operation_json(&operation));
        } else {
            print_operation(&operation);
        }
    }

    watch.stop();
    Ok(())
}

fn build_target(args: &WatchArgs) -> WatchTarget {
    match &args.dir {
        Some(dir) => {
            let mut target = WatchTarget::directory(dir);
            if let Some(suffix) = &args.suffix {
                target = target.with_suffix(suffix);
            }
            if args.recursive {
                target = target.recursive();
            }
            target
        }
        None if args.paths.len() == 1 => WatchTarget::file(&args.paths[0]),
        None => WatchTarget::files(args.paths.iter().cloned()),
    }
}

fn event_json(event: &ChangeEvent) -> serde_json::Value {
    serde_json::json!({
        "sequence": event.sequence(),
        "path": event.file_path().display().to_string(),
        "operation": event.operation_type(),
        "timestamp": util::format_rfc3339(event.timestamp()),
        "streaming": event.is_streaming(),
        "size": event.size_bytes(),
        "previous_size": event.previous_size(),
        "renamed_from": event.renamed_from().map(|p| p.display().to_string()),
    })
}

fn operation_json(operation: &FileOperation) -> serde_json::Value {
    serde_json::json!({
        "operation": operation.kind.as_str(),
        "path": operation.primary_path.display().to_string(),
        "confidence": operation.confidence,
        "description": operation.description,
        "events": operation.event_count(),
        "files": operation
            .files_affected
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>(),
        "atomic": operation.is_atomic,
        "safe": operation.is_safe,
        "backup": operation.has_backup,
    })
}

fn print_operation(operation: &FileOperation) {
    let kind = format!("{:<15}", operation.kind.as_str());
    let kind = match operation.kind {
        OperationKind::AtomicSave | OperationKind::SafeWrite => kind.green().to_string(),
        OperationKind::BatchUpdate | OperationKind::RenameSequence => kind.cyan().to_string(),
        OperationKind::BackupCreate => kind.yellow().to_string(),
        OperationKind::Unknown => kind.dimmed().to_string(),
    };
    println!(
        "{} {} {}",
        kind,
        operation.description,
        format!("({:.0}%)", operation.confidence * 100.0).dimmed()
    );
}

fn print_event(event: &ChangeEvent) {
    let clock = util::format_clock(event.timestamp());
    let op = format!("{:<8}", event.operation_type().as_str());
    let op = match event.operation_type() {
        OperationType::Created => op.green().to_string(),
        OperationType::Modified => op.yellow().to_string(),
        OperationType::Deleted => op.red().to_string(),
        OperationType::Renamed => op.cyan().to_string(),
    };

    let mut line = format!("{} {} {}", clock.dimmed(), op, event.file_path().display());
    if let Some(from) = event.renamed_from() {
        line.push_str(&format!(" (from {})", from.display()));
    }
    if let Some(size) = event.size_bytes() {
        line.push_str(&format!(" {}", util::format_size(size).dimmed()));
    }
    if event.is_streaming() {
        line.push_str(&format!(" {}", "streaming".dimmed()));
    }
    println!("{}", line);
}

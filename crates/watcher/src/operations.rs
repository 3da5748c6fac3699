//! Operation pattern recognition
//!
//! Editors and tools rarely change a file with a single write. A save is
//! often "write a temp file, rename it over the original", sometimes with a
//! backup copy first. `OperationDetector` groups raw notifications that
//! arrive close together and names the operation they form.
//!
//! Notifications are grouped by time: a gap longer than
//! `time_window_ms` closes the group. Each group is matched against the
//! registered patterns in priority order. A match at or above
//! [`EARLY_ACCEPT`] confidence wins immediately; otherwise the most
//! confident match above `min_confidence` is taken. Matched notifications
//! are removed and the rest of the group is matched again. Whatever is left
//! becomes one `Unknown` operation per real file. Temp-file churn that never
//! reaches a real file is dropped.

use crate::config::OperationConfig;
use crate::platform::{self, HintReceiver, NotificationSource, RawKind, RawNotification, SourceFactory};
use settle_core::{extract_base_name, is_temp_file, FileOperationError};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Confidence at which a match ends the search
pub const EARLY_ACCEPT: f32 = 0.95;

/// Extensions of backup copies
const BACKUP_EXTENSIONS: [&str; 4] = ["bak", "bck", "backup", "orig"];

/// Kind of higher-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Content written elsewhere, then moved or recreated over the target
    AtomicSave,
    /// Backup copy taken, then the original written in place
    SafeWrite,
    /// Several files in one directory changed together
    BatchUpdate,
    /// A file renamed more than once in a row
    RenameSequence,
    /// A backup copy created on its own
    BackupCreate,
    /// A change no pattern explains
    Unknown,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::AtomicSave => "atomic_save",
            OperationKind::SafeWrite => "safe_write",
            OperationKind::BatchUpdate => "batch_update",
            OperationKind::RenameSequence => "rename_sequence",
            OperationKind::BackupCreate => "backup_create",
            OperationKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw notification with its arrival time
#[derive(Debug, Clone, PartialEq)]
pub struct OperationEvent {
    pub raw: RawNotification,
    pub at: Instant,
}

impl OperationEvent {
    pub fn new(raw: RawNotification, at: Instant) -> Self {
        Self { raw, at }
    }

    fn path(&self) -> &Path {
        &self.raw.path
    }
}

/// A recognised operation
#[derive(Debug, Clone, PartialEq)]
pub struct FileOperation {
    pub kind: OperationKind,
    /// The file (or directory, for batches) the operation is about
    pub primary_path: PathBuf,
    pub events: Vec<OperationEvent>,
    pub confidence: f32,
    pub description: String,
    pub files_affected: Vec<PathBuf>,
    /// The target never held partial content
    pub is_atomic: bool,
    /// The previous content stayed recoverable
    pub is_safe: bool,
    pub has_backup: bool,
}

impl FileOperation {
    pub fn new(
        kind: OperationKind,
        primary_path: impl Into<PathBuf>,
        confidence: f32,
        events: Vec<OperationEvent>,
    ) -> Self {
        let primary_path = primary_path.into();
        Self {
            kind,
            description: format!("{} of {}", kind, display_name(&primary_path)),
            files_affected: vec![primary_path.clone()],
            primary_path,
            events,
            confidence,
            is_atomic: false,
            is_safe: false,
            has_backup: false,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn affecting(mut self, files: Vec<PathBuf>) -> Self {
        self.files_affected = files;
        self
    }

    pub fn atomic(mut self) -> Self {
        self.is_atomic = true;
        self
    }

    pub fn safe(mut self) -> Self {
        self.is_safe = true;
        self
    }

    pub fn with_backup(mut self, has_backup: bool) -> Self {
        self.has_backup = has_backup;
        self
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.events.iter().map(|e| e.at).min()
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.events.iter().map(|e| e.at).max()
    }
}

/// A recogniser for one kind of operation
pub trait OperationPattern: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> u8;

    /// Look for the operation among `events`, which are in arrival order
    fn recognize(&self, events: &[OperationEvent], config: &OperationConfig) -> Option<FileOperation>;
}

type RecognizeFn = fn(&[OperationEvent], &OperationConfig) -> Option<FileOperation>;

struct Builtin {
    name: &'static str,
    priority: u8,
    recognize: RecognizeFn,
}

impl OperationPattern for Builtin {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn recognize(&self, events: &[OperationEvent], config: &OperationConfig) -> Option<FileOperation> {
        (self.recognize)(events, config)
    }
}

fn builtin_patterns() -> Vec<Box<dyn OperationPattern>> {
    let builtins: [(&'static str, u8, RecognizeFn); 6] = [
        ("rename_into_place", 95, rename_into_place as RecognizeFn),
        ("replace_by_recreate", 92, replace_by_recreate as RecognizeFn),
        ("write_with_backup", 85, write_with_backup as RecognizeFn),
        ("rename_chain", 80, rename_chain as RecognizeFn),
        ("backup_only", 70, backup_only as RecognizeFn),
        ("batch_update", 60, batch_update as RecognizeFn),
    ];
    builtins
        .into_iter()
        .map(|(name, priority, recognize)| {
            Box::new(Builtin {
                name,
                priority,
                recognize,
            }) as Box<dyn OperationPattern>
        })
        .collect()
}

/// Groups raw notifications into operations
pub struct OperationDetector {
    config: OperationConfig,
    patterns: Vec<Box<dyn OperationPattern>>,

    /// Notifications of the group still open
    pending: Vec<OperationEvent>,
    ready: VecDeque<FileOperation>,
}

impl OperationDetector {
    pub fn new(config: OperationConfig) -> Self {
        Self {
            config,
            patterns: builtin_patterns(),
            pending: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Add a pattern; it runs before built-ins of lower priority
    pub fn register(&mut self, pattern: Box<dyn OperationPattern>) {
        let idx = self
            .patterns
            .iter()
            .position(|p| p.priority() < pattern.priority())
            .unwrap_or(self.patterns.len());
        self.patterns.insert(idx, pattern);
    }

    /// Pattern names in the order they run
    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    /// Recognise operations in a complete list of notifications
    pub fn detect(&self, events: &[OperationEvent]) -> Vec<FileOperation> {
        group_by_time(events, self.config.time_window())
            .into_iter()
            .flat_map(|group| self.analyze(group))
            .collect()
    }

    /// Record a notification that arrived now
    pub fn push(&mut self, raw: RawNotification) {
        self.push_at(raw, Instant::now());
    }

    /// Record a notification; a gap longer than the window closes the open group
    pub fn push_at(&mut self, raw: RawNotification, at: Instant) {
        if let Some(last) = self.pending.last() {
            if at.saturating_duration_since(last.at) > self.config.time_window() {
                self.close_group();
            }
        }
        self.pending.push(OperationEvent::new(raw, at));
    }

    /// Next finished operation, closing the open group once it has been quiet for the window
    pub fn pop_ready(&mut self, now: Instant) -> Option<FileOperation> {
        if let Some(deadline) = self.next_deadline() {
            if now >= deadline {
                self.close_group();
            }
        }
        self.ready.pop_front()
    }

    /// When the open group will be closed
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.last().map(|e| e.at + self.config.time_window())
    }

    /// Treat the open group as complete
    pub fn close_group(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let group = std::mem::take(&mut self.pending);
        for operation in self.analyze(group) {
            debug!(
                kind = %operation.kind,
                path = %operation.primary_path.display(),
                confidence = operation.confidence,
                events = operation.event_count(),
                "Operation detected"
            );
            self.ready.push_back(operation);
        }
    }

    /// Close the open group and take every finished operation
    pub fn flush(&mut self) -> Vec<FileOperation> {
        self.close_group();
        self.ready.drain(..).collect()
    }

    /// Notifications waiting in the open group
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop the open group and any finished operations
    pub fn clear(&mut self) {
        self.pending.clear();
        self.ready.clear();
    }

    fn analyze(&self, mut remaining: Vec<OperationEvent>) -> Vec<FileOperation> {
        remaining.retain(|e| e.raw.kind != RawKind::Rescan);

        let mut operations = Vec::new();
        while !remaining.is_empty() {
            let Some(operation) = self.best_match(&remaining) else {
                break;
            };
            let before = remaining.len();
            remaining.retain(|e| !operation.events.contains(e));
            operations.push(operation);
            if remaining.len() == before {
                // A pattern that claims nothing would match forever
                break;
            }
        }

        operations.extend(direct_changes(&remaining));
        operations.sort_by_key(|op| op.started_at());
        operations
    }

    fn best_match(&self, events: &[OperationEvent]) -> Option<FileOperation> {
        let mut best: Option<FileOperation> = None;
        for pattern in &self.patterns {
            let Some(operation) = pattern.recognize(events, &self.config) else {
                continue;
            };
            if operation.confidence < self.config.min_confidence {
                continue;
            }
            if operation.confidence >= EARLY_ACCEPT {
                return Some(operation);
            }
            if best.as_ref().map_or(true, |b| operation.confidence > b.confidence) {
                best = Some(operation);
            }
        }
        best
    }
}

impl Default for OperationDetector {
    fn default() -> Self {
        Self::new(OperationConfig::default())
    }
}

/// Split notifications into groups separated by gaps longer than `window`
pub fn group_by_time(events: &[OperationEvent], window: Duration) -> Vec<Vec<OperationEvent>> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| e.at);

    let mut groups: Vec<Vec<OperationEvent>> = Vec::new();
    for event in sorted {
        let continues = groups
            .last()
            .and_then(|group| group.last())
            .map_or(false, |last| event.at.saturating_duration_since(last.at) <= window);
        if !continues {
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(event);
        }
    }
    groups
}

// Built-in patterns

/// Temp file renamed over the real file
fn rename_into_place(events: &[OperationEvent], _config: &OperationConfig) -> Option<FileOperation> {
    events.iter().find_map(|event| {
        let RawKind::RenamedTo { from: Some(from) } = &event.raw.kind else {
            return None;
        };
        let dest = event.path();
        if is_temp_file(dest) {
            return None;
        }

        let confidence = if stands_in_for(from, dest) {
            0.95
        } else if is_temp_file(from) && same_dir(from, dest) {
            0.9
        } else {
            return None;
        };

        let related = collect(events, |e| {
            e.path() == from.as_path() || e.path() == dest || stands_in_for(e.path(), dest)
        });
        let has_backup = related.iter().any(|e| is_backup(e.path()));
        Some(
            FileOperation::new(OperationKind::AtomicSave, dest, confidence, related)
                .atomic()
                .safe()
                .with_backup(has_backup)
                .described(format!("Atomic save of {} via {}", display_name(dest), display_name(from))),
        )
    })
}

/// Real file deleted (or its temp stand-in cycled) and created again
fn replace_by_recreate(events: &[OperationEvent], _config: &OperationConfig) -> Option<FileOperation> {
    events.iter().enumerate().find_map(|(i, created)| {
        let path = created.path();
        if created.raw.kind != RawKind::Created || is_temp_file(path) {
            return None;
        }

        let removed = |same: fn(&Path, &Path) -> bool| {
            events[..i]
                .iter()
                .any(|e| e.raw.kind == RawKind::Removed && same(e.path(), path))
        };
        let confidence = if removed(stands_in_for) {
            0.95
        } else if removed(|a, b| a == b) {
            0.93
        } else {
            return None;
        };

        let related = collect(events, |e| e.path() == path || stands_in_for(e.path(), path));
        let has_backup = related.iter().any(|e| is_backup(e.path()));
        Some(
            FileOperation::new(OperationKind::AtomicSave, path, confidence, related)
                .atomic()
                .with_backup(has_backup)
                .described(format!("Atomic save of {} by replacement", display_name(path))),
        )
    })
}

/// Backup copy created, then the original written
fn write_with_backup(events: &[OperationEvent], _config: &OperationConfig) -> Option<FileOperation> {
    events.iter().find_map(|backup| {
        if backup.raw.kind != RawKind::Created {
            return None;
        }
        let real = backup.path().with_file_name(backup_base(backup.path())?);
        let written = events.iter().any(|e| {
            e.path() == real && matches!(e.raw.kind, RawKind::Modified | RawKind::Created)
        });
        if !written {
            return None;
        }

        let related = collect(events, |e| e.path() == real || stands_in_for(e.path(), &real));
        Some(
            FileOperation::new(OperationKind::SafeWrite, &real, 0.9, related)
                .safe()
                .with_backup(true)
                .affecting(vec![real.clone(), backup.path().to_path_buf()])
                .described(format!(
                    "Safe write of {} with backup {}",
                    display_name(&real),
                    display_name(backup.path())
                )),
        )
    })
}

/// A rename whose destination is renamed again
fn rename_chain(events: &[OperationEvent], _config: &OperationConfig) -> Option<FileOperation> {
    let renames: Vec<(&Path, &Path)> = events
        .iter()
        .filter_map(|e| match &e.raw.kind {
            RawKind::RenamedTo { from: Some(from) } => Some((from.as_path(), e.path())),
            _ => None,
        })
        .collect();

    let destinations: HashSet<&Path> = renames.iter().map(|(_, to)| *to).collect();
    renames.iter().find_map(|&(start, first_dest)| {
        if destinations.contains(start) {
            return None;
        }

        let mut chain = vec![start, first_dest];
        let mut current = first_dest;
        while let Some(&(_, next)) = renames.iter().find(|(from, _)| *from == current) {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        if chain.len() < 3 {
            return None;
        }

        let related = collect(events, |e| chain.contains(&e.path()));
        Some(
            FileOperation::new(OperationKind::RenameSequence, current, 0.9, related)
                .atomic()
                .affecting(vec![start.to_path_buf(), current.to_path_buf()])
                .described(format!(
                    "Renamed {} to {} in {} steps",
                    display_name(start),
                    display_name(current),
                    chain.len() - 1
                )),
        )
    })
}

/// Backup created without the original changing
fn backup_only(events: &[OperationEvent], _config: &OperationConfig) -> Option<FileOperation> {
    events.iter().find_map(|backup| {
        if backup.raw.kind != RawKind::Created {
            return None;
        }
        let base = backup_base(backup.path())?;
        let real = backup.path().with_file_name(&base);
        if events.iter().any(|e| e.path() == real) {
            return None;
        }

        let related = collect(events, |e| e.path() == backup.path());
        Some(
            FileOperation::new(OperationKind::BackupCreate, backup.path(), 0.85, related)
                .safe()
                .with_backup(true)
                .described(format!("Backup of {} created", base)),
        )
    })
}

/// Several real files in one directory changed within the window
fn batch_update(events: &[OperationEvent], config: &OperationConfig) -> Option<FileOperation> {
    let real: Vec<&OperationEvent> = events
        .iter()
        .filter(|e| !is_temp_file(e.path()) && e.raw.kind != RawKind::RenamedFrom)
        .collect();

    let mut dirs: Vec<&Path> = Vec::new();
    for event in &real {
        if let Some(dir) = event.path().parent() {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }

    dirs.into_iter().find_map(|dir| {
        let in_dir: Vec<OperationEvent> = real
            .iter()
            .filter(|e| e.path().parent() == Some(dir))
            .map(|e| (*e).clone())
            .collect();

        let mut files: Vec<PathBuf> = Vec::new();
        for event in &in_dir {
            if !files.iter().any(|f| f == event.path()) {
                files.push(event.path().to_path_buf());
            }
        }
        if in_dir.len() < config.min_events_for_complex || files.len() < 2 {
            return None;
        }

        let description = format!("Batch update of {} files in {}", files.len(), display_name(dir));
        Some(
            FileOperation::new(OperationKind::BatchUpdate, dir, 0.8, in_dir)
                .affecting(files)
                .described(description),
        )
    })
}

/// One `Unknown` operation per real file left over after matching
fn direct_changes(events: &[OperationEvent]) -> Vec<FileOperation> {
    let paired_sources: HashSet<&Path> = events
        .iter()
        .filter_map(|e| match &e.raw.kind {
            RawKind::RenamedTo { from: Some(from) } => Some(from.as_path()),
            _ => None,
        })
        .collect();

    let mut by_path: Vec<(PathBuf, Vec<OperationEvent>)> = Vec::new();
    for event in events {
        let path = event.path();
        if path.as_os_str().is_empty() || is_temp_file(path) {
            continue;
        }
        if event.raw.kind == RawKind::RenamedFrom && paired_sources.contains(path) {
            continue;
        }
        match by_path.iter_mut().find(|(p, _)| p == path) {
            Some((_, group)) => group.push(event.clone()),
            None => by_path.push((path.to_path_buf(), vec![event.clone()])),
        }
    }

    by_path
        .into_iter()
        .map(|(path, events)| {
            let description = format!("Change to {}", display_name(&path));
            FileOperation::new(OperationKind::Unknown, path, 1.0, events).described(description)
        })
        .collect()
}

// Name helpers

fn collect(events: &[OperationEvent], keep: impl Fn(&OperationEvent) -> bool) -> Vec<OperationEvent> {
    events.iter().filter(|e| keep(e)).cloned().collect()
}

fn display_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.display().to_string(),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    a.parent() == b.parent()
}

/// Name of the file a backup copy preserves
fn backup_base(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if let Some(base) = name.strip_suffix('~') {
        return (!base.is_empty()).then(|| base.to_string());
    }
    let (base, ext) = name.rsplit_once('.')?;
    (BACKUP_EXTENSIONS.contains(&ext) && !base.is_empty()).then(|| base.to_string())
}

fn is_backup(path: &Path) -> bool {
    backup_base(path).is_some()
}

/// True when `candidate` is a temp or backup sibling of `real`
fn stands_in_for(candidate: &Path, real: &Path) -> bool {
    if candidate == real || !same_dir(candidate, real) {
        return false;
    }
    let (Some(name), Some(real_name)) = (
        candidate.file_name().and_then(|n| n.to_str()),
        real.file_name().and_then(|n| n.to_str()),
    ) else {
        return false;
    };

    if extract_base_name(candidate).as_deref() == Some(real_name)
        || backup_base(candidate).as_deref() == Some(real_name)
    {
        return true;
    }

    // name.ext.tmp.1234
    name.strip_prefix(real_name)
        .and_then(|rest| rest.strip_prefix('.'))
        .map_or(false, |rest| rest.split('.').any(|part| part == "tmp"))
}

/// Live operation recognition from a notification source
///
/// Temp-file activity is held back until the operation it belongs to
/// completes, so a consumer only sees finished operations.
pub struct OperationWatch {
    root: PathBuf,
    source: Option<Box<dyn NotificationSource>>,
    hints: Option<HintReceiver>,
    detector: OperationDetector,
    stopped: bool,
}

impl OperationWatch {
    pub(crate) fn start(
        root: PathBuf,
        recursive: bool,
        factory: &SourceFactory,
        config: OperationConfig,
    ) -> settle_core::Result<Self> {
        let (tx, hints) = platform::hint_channel(platform::HINT_QUEUE_CAPACITY);
        let mut source = factory(tx).map_err(|e| {
            FileOperationError::new(
                "native notifications unavailable",
                &root,
                io::Error::new(io::ErrorKind::Unsupported, format!("{:#}", e)),
            )
        })?;
        source.subscribe(&root, recursive).map_err(|e| {
            FileOperationError::new(
                "cannot subscribe to directory",
                &root,
                io::Error::new(io::ErrorKind::Other, format!("{:#}", e)),
            )
        })?;

        debug!("Watching operations in {}", root.display());
        Ok(Self {
            root,
            source: Some(source),
            hints: Some(hints),
            detector: OperationDetector::new(config),
            stopped: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait for the next completed operation
    ///
    /// Returns `None` after `stop()`, or once the source has closed and
    /// every buffered operation has been returned.
    pub async fn next_operation(&mut self) -> Option<FileOperation> {
        loop {
            if self.stopped {
                return None;
            }
            if let Some(operation) = self.detector.pop_ready(Instant::now()) {
                return Some(operation);
            }

            let Some(hints) = self.hints.as_mut() else {
                self.detector.close_group();
                return self.detector.pop_ready(Instant::now());
            };
            let deadline = self.detector.next_deadline();

            tokio::select! {
                raw = hints.recv() => match raw {
                    Some(raw) if raw.kind == RawKind::Rescan => {
                        warn!("Notifications were dropped; operations may be incomplete");
                    }
                    Some(raw) => self.detector.push(raw),
                    None => {
                        debug!("Notification source closed");
                        self.hints = None;
                    }
                },
                _ = sleep_until(deadline) => {}
            }
        }
    }

    /// Unsubscribe and discard buffered notifications
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.detector.clear();
        if let Some(hints) = self.hints.take() {
            hints.closer().close();
        }
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.unsubscribe(&self.root) {
                debug!("Unsubscribe {} failed: {:#}", self.root.display(), e);
            }
        }
    }
}

impl Drop for OperationWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

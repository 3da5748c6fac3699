//! Watch sessions
//!
//! A `FileOperationDetector` starts `WatchSession`s. Each session runs one
//! cooperative loop inside `next_event()`:
//!
//! 1. Emit any debounced event that is due
//! 2. On poll ticks, sample every watched path and feed the tracker
//! 3. Otherwise wait for a native notification, the next debounce
//!    deadline, the next poll tick, or a stop request
//!
//! Sessions own their tracker and debouncer; nothing carries over between
//! sessions. That state lives behind a lock shared with the session's
//! `StopHandle`s, so stopping from any task releases it immediately.

use crate::config::{ConfigError, DetectorConfig};
use crate::debounce::Debouncer;
use crate::filter::WatchFilter;
use crate::operations::OperationWatch;
use crate::platform::{
    self, HintCloser, HintReceiver, NotificationSource, RawKind, RawNotification, SourceFactory,
};
use crate::scan;
use crate::streaming::{Sample, StreamingStateTracker};
use crate::target::WatchTarget;
use futures::Stream;
use parking_lot::Mutex;
use settle_core::{extract_base_name, is_temp_file, ChangeEvent, FileOperationError};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cancels a watch session from any task or thread
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
    core: Arc<Mutex<SessionCore>>,
}

impl StopHandle {
    fn new(core: Arc<Mutex<SessionCore>>) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx), core }, rx)
    }

    /// Stop the session and release its per-path state and subscriptions
    ///
    /// A pending `next_event()` resolves to `None`.
    pub fn stop(&self) {
        self.core.lock().teardown();
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Starts watch sessions with a shared configuration
pub struct FileOperationDetector {
    config: DetectorConfig,
    source_factory: Option<SourceFactory>,
    sessions: Mutex<Vec<StopHandle>>,
}

impl FileOperationDetector {
    /// Create a detector; native notifications follow `config.native_events`
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        let factory = config.native_events.then(platform::native_factory);
        Self::with_source_factory(config, factory)
    }

    /// Create a detector with a custom notification source, or `None` to poll only
    pub fn with_source_factory(
        config: DetectorConfig,
        source_factory: Option<SourceFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            source_factory,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Watch exactly one file
    pub fn watch(&self, path: impl AsRef<Path>) -> settle_core::Result<WatchSession> {
        self.watch_target(WatchTarget::file(path.as_ref()))
    }

    /// Watch an explicit set of files
    pub fn watch_multiple<I, P>(&self, paths: I) -> settle_core::Result<WatchSession>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.watch_target(WatchTarget::files(
            paths.into_iter().map(|p| p.as_ref().to_path_buf()),
        ))
    }

    /// Watch the entries of a directory, optionally only those with `suffix_filter`
    pub fn watch_directory(
        &self,
        dir: impl AsRef<Path>,
        suffix_filter: Option<&str>,
    ) -> settle_core::Result<WatchSession> {
        let target = WatchTarget::directory(dir.as_ref());
        let target = match suffix_filter {
            Some(suffix) => target.with_suffix(suffix),
            None => target,
        };
        self.watch_target(target)
    }

    /// Start a session for any target
    ///
    /// Fails without creating a session if a watched path does not exist or
    /// has the wrong type.
    pub fn watch_target(&self, target: WatchTarget) -> settle_core::Result<WatchSession> {
        let scope = Scope::resolve(&target, &self.config)?;
        let session = WatchSession::start(target, scope, &self.config, self.source_factory.as_ref());

        let mut sessions = self.sessions.lock();
        sessions.retain(|handle| !handle.is_stopped());
        sessions.push(session.stop_handle());
        Ok(session)
    }

    /// Recognise editor and tool operations in a directory
    ///
    /// Needs a notification source: polling cannot see the temp files an
    /// operation passes through.
    pub fn watch_operations(
        &self,
        dir: impl AsRef<Path>,
        recursive: bool,
    ) -> settle_core::Result<OperationWatch> {
        let root = resolve_directory(dir.as_ref())?;
        let Some(factory) = self.source_factory.as_ref() else {
            return Err(FileOperationError::new(
                "operation detection needs native notifications",
                &root,
                io::Error::new(io::ErrorKind::Unsupported, "no notification source"),
            ));
        };
        OperationWatch::start(root, recursive, factory, self.config.operations.clone())
    }

    /// Stop every session this detector started
    pub fn stop(&self) {
        for handle in self.sessions.lock().drain(..) {
            handle.stop();
        }
    }
}

/// Resolved set of paths a session samples
enum Scope {
    Paths(BTreeSet<PathBuf>),
    Directory {
        root: PathBuf,
        recursive: bool,
        filter: WatchFilter,
    },
}

impl Scope {
    fn resolve(target: &WatchTarget, config: &DetectorConfig) -> settle_core::Result<Self> {
        match target {
            WatchTarget::File(path) => Ok(Scope::Paths(BTreeSet::from([resolve_file(path)?]))),
            WatchTarget::Files(paths) => {
                if paths.is_empty() {
                    return Err(FileOperationError::new(
                        "no paths to watch",
                        PathBuf::new(),
                        io::Error::new(io::ErrorKind::InvalidInput, "empty path set"),
                    ));
                }
                let resolved = paths
                    .iter()
                    .map(|p| resolve_file(p))
                    .collect::<settle_core::Result<BTreeSet<_>>>()?;
                Ok(Scope::Paths(resolved))
            }
            WatchTarget::Directory {
                path,
                suffix,
                recursive,
            } => {
                let root = resolve_directory(path)?;
                let filter = WatchFilter::new(&root, suffix.as_deref(), config).map_err(|e| {
                    FileOperationError::new(
                        "invalid directory filter",
                        &root,
                        io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
                    )
                })?;
                Ok(Scope::Directory {
                    root,
                    recursive: *recursive,
                    filter,
                })
            }
        }
    }

    /// Paths to sample on a poll tick, including tracked paths that may be gone
    fn candidates(&self, tracker: &StreamingStateTracker) -> Vec<PathBuf> {
        match self {
            Scope::Paths(paths) => paths.iter().cloned().collect(),
            Scope::Directory {
                root,
                recursive,
                filter,
            } => {
                let mut paths: BTreeSet<PathBuf> = match scan::list_directory(root, *recursive, filter) {
                    Ok(files) => files.into_iter().collect(),
                    Err(e) => {
                        debug!("Cannot list {}: {}", root.display(), e);
                        BTreeSet::new()
                    }
                };
                paths.extend(tracker.tracked_paths());
                paths.into_iter().collect()
            }
        }
    }

    fn contains(&self, path: &Path) -> bool {
        match self {
            Scope::Paths(paths) => paths.contains(path),
            Scope::Directory {
                root,
                recursive,
                filter,
            } => (*recursive || path.parent() == Some(root.as_path())) && filter.accepts(path),
        }
    }

    /// Paths to subscribe for native notifications
    fn subscriptions(&self) -> Vec<(PathBuf, bool)> {
        match self {
            // Watch parents so replace-by-rename saves keep reporting
            Scope::Paths(paths) => paths
                .iter()
                .filter_map(|p| p.parent().map(Path::to_path_buf))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|dir| (dir, false))
                .collect(),
            Scope::Directory { root, recursive, .. } => vec![(root.clone(), *recursive)],
        }
    }
}

fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn resolve_file(path: &Path) -> settle_core::Result<PathBuf> {
    let absolute = absolutize(path)
        .map_err(|e| FileOperationError::new("cannot resolve watch target", path, e))?;
    let meta = std::fs::metadata(&absolute)
        .map_err(|e| FileOperationError::new("watch target does not exist", &absolute, e))?;
    if meta.is_dir() {
        return Err(FileOperationError::new(
            "watch target is a directory",
            &absolute,
            io::Error::new(io::ErrorKind::InvalidInput, "expected a file"),
        ));
    }
    Ok(absolute)
}

fn resolve_directory(path: &Path) -> settle_core::Result<PathBuf> {
    let absolute = absolutize(path)
        .map_err(|e| FileOperationError::new("cannot resolve watch directory", path, e))?;
    let meta = std::fs::metadata(&absolute)
        .map_err(|e| FileOperationError::new("watch directory does not exist", &absolute, e))?;
    if !meta.is_dir() {
        return Err(FileOperationError::new(
            "watch target is not a directory",
            &absolute,
            io::Error::new(io::ErrorKind::InvalidInput, "expected a directory"),
        ));
    }
    Ok(absolute)
}

/// One lifecycle of observing a `WatchTarget`
///
/// Produces an unbounded sequence of events through [`next_event`](Self::next_event)
/// or [`into_stream`](Self::into_stream). Intended for a single consumer.
pub struct WatchSession {
    target: WatchTarget,
    core: Arc<Mutex<SessionCore>>,
    hints: Option<HintReceiver>,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
}

impl fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSession")
            .field("target", &self.target)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

impl WatchSession {
    fn start(
        target: WatchTarget,
        scope: Scope,
        config: &DetectorConfig,
        source_factory: Option<&SourceFactory>,
    ) -> Self {
        let mut tracker = StreamingStateTracker::new(config.stability_threshold);

        // Files present at start are the baseline, not changes
        for path in scope.candidates(&tracker) {
            if let Ok(Sample::Present { size, mtime }) = scan::sample(&path) {
                tracker.prime(path, size, mtime);
            }
        }

        let mut subscriptions = Vec::new();
        let mut hint_closer = None;
        let (source, hints) = match source_factory {
            Some(factory) => {
                let (tx, rx) = platform::hint_channel(platform::HINT_QUEUE_CAPACITY);
                match factory(tx) {
                    Ok(mut source) => {
                        for (path, recursive) in scope.subscriptions() {
                            match source.subscribe(&path, recursive) {
                                Ok(()) => subscriptions.push(path),
                                Err(e) => warn!("Native watch on {} failed: {:#}", path.display(), e),
                            }
                        }
                        hint_closer = Some(rx.closer());
                        (Some(source), Some(rx))
                    }
                    Err(e) => {
                        warn!("Native notifications unavailable, polling only: {:#}", e);
                        (None, None)
                    }
                }
            }
            None => (None, None),
        };

        info!(
            "Watching {:?} ({} files, poll {:?}, debounce {:?})",
            target,
            tracker.len(),
            config.poll_interval(),
            config.debounce_window()
        );

        let core = Arc::new(Mutex::new(SessionCore {
            scope,
            tracker,
            debouncer: Debouncer::new(config.debounce_window()),
            poll_interval: config.poll_interval(),
            next_poll: Instant::now() + config.poll_interval(),
            source,
            subscriptions,
            hint_closer,
            sequence: 0,
            finished: false,
        }));
        let (stop, stop_rx) = StopHandle::new(Arc::clone(&core));

        Self {
            target,
            core,
            hints,
            stop,
            stop_rx,
        }
    }

    /// Wait for the next change event
    ///
    /// Returns `None` once the session is stopped, including when the stop
    /// happens while this call is waiting.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            let step = self.core.lock().step();
            let wake = match step {
                Step::Emit(event) => return Some(event),
                Step::Finished => {
                    self.hints = None;
                    return None;
                }
                Step::Wait(wake) => wake,
            };

            tokio::select! {
                biased;
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        self.core.lock().teardown();
                    }
                }
                raw = recv_hint(&mut self.hints) => match raw {
                    Some(raw) => {
                        self.core.lock().apply_hint(raw);
                    }
                    None => {
                        debug!("Native notification source closed");
                        self.hints = None;
                    }
                },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Convert into a `Stream` of events; stop it through a [`StopHandle`]
    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send {
        futures::stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }

    /// Stop the session and release all per-path state
    pub fn stop(&mut self) {
        self.stop.stop();
        self.hints = None;
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Number of paths with streaming state
    pub fn tracked_count(&self) -> usize {
        self.core.lock().tracker.len()
    }

    /// Number of events waiting out their debounce window
    pub fn pending_count(&self) -> usize {
        self.core.lock().debouncer.len()
    }

    /// Number of native subscriptions held by this session
    pub fn subscription_count(&self) -> usize {
        self.core.lock().subscriptions.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.core.lock().finished || self.stop.is_stopped()
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// What the session loop does next
enum Step {
    Emit(ChangeEvent),
    Wait(Instant),
    Finished,
}

/// Per-path state of a session, shared with its stop handles
struct SessionCore {
    scope: Scope,
    tracker: StreamingStateTracker,
    debouncer: Debouncer,
    poll_interval: Duration,
    next_poll: Instant,

    /// Native notification source (optional)
    source: Option<Box<dyn NotificationSource>>,
    subscriptions: Vec<PathBuf>,
    hint_closer: Option<HintCloser>,

    sequence: u64,
    finished: bool,
}

impl SessionCore {
    /// Emit a due event, poll if a tick is due, or report when to wake up
    fn step(&mut self) -> Step {
        loop {
            if self.finished {
                return Step::Finished;
            }

            let now = Instant::now();
            if let Some(event) = self.debouncer.pop_due(now) {
                self.sequence += 1;
                return Step::Emit(event.with_sequence(self.sequence));
            }

            if now >= self.next_poll {
                self.poll();
                self.next_poll = now + self.poll_interval;
                continue;
            }

            return Step::Wait(match self.debouncer.next_deadline() {
                Some(deadline) => deadline.min(self.next_poll),
                None => self.next_poll,
            });
        }
    }

    fn poll(&mut self) {
        for path in self.scope.candidates(&self.tracker) {
            self.observe(&path, true, None);
        }
    }

    fn apply_hint(&mut self, raw: RawNotification) {
        if self.finished {
            return;
        }
        let RawNotification { path, kind } = raw;

        let renamed_from = match kind {
            RawKind::Rescan => {
                debug!("Notification overflow, rescanning");
                self.poll();
                self.next_poll = Instant::now() + self.poll_interval;
                return;
            }
            // A temp file renamed into place is a save, not a rename
            RawKind::RenamedTo { from } => from.filter(|f| !is_temp_file(f)),
            _ => None,
        };

        if self.scope.contains(&path) {
            self.observe(&path, false, renamed_from);
        } else if is_temp_file(&path) {
            // Editor churn next to a watched file: look at the real file now
            if let Some(base) = extract_base_name(&path) {
                let real = path.with_file_name(base);
                if self.scope.contains(&real) {
                    self.observe(&real, false, None);
                }
            }
        }
    }

    fn observe(&mut self, path: &Path, from_poll: bool, renamed_from: Option<PathBuf>) {
        let sample = match scan::sample(path) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Failed to sample {}: {}", path.display(), e);
                return;
            }
        };

        let classification = if from_poll {
            self.tracker.sample(path, sample)
        } else {
            self.tracker.hint(path, sample, renamed_from)
        };

        if let Some(event) = classification.to_event(path) {
            debug!(
                path = %path.display(),
                operation = %event.operation_type(),
                streaming = event.is_streaming(),
                "Change detected"
            );
            self.debouncer.submit(event);
        }
    }

    /// Release per-path state, native subscriptions and the hint queue
    fn teardown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.tracker.clear();
        self.debouncer.clear();
        if let Some(closer) = self.hint_closer.take() {
            closer.close();
        }
        if let Some(mut source) = self.source.take() {
            for path in self.subscriptions.drain(..) {
                if let Err(e) = source.unsubscribe(&path) {
                    debug!("Unsubscribe {} failed: {:#}", path.display(), e);
                }
            }
        }
        self.subscriptions.clear();
        debug!("Watch session stopped");
    }
}

async fn recv_hint(hints: &mut Option<HintReceiver>) -> Option<RawNotification> {
    match hints {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

//! Raw change notification sources
//!
//! The poll loop is the ground truth. A notification source is an optional
//! low-latency input: each raw notification makes the detector sample the
//! named path immediately instead of waiting for the next poll.
//!
//! Notifications travel through a bounded queue. When the queue is full the
//! notification is dropped and the receiver later reports a single
//! [`RawKind::Rescan`], so a slow consumer costs one full re-sample instead
//! of unbounded memory.

mod native;

pub use native::NotifySource;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of a session's notification queue
pub const HINT_QUEUE_CAPACITY: usize = 1024;

/// Kind of raw notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKind {
    Created,
    Modified,
    Removed,
    /// Path is the source of a rename
    RenamedFrom,
    /// Path is the destination of a rename
    RenamedTo { from: Option<PathBuf> },
    /// Events were lost; everything should be re-sampled
    Rescan,
}

/// One notification from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub path: PathBuf,
    pub kind: RawKind,
}

impl RawNotification {
    pub fn new(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    fn rescan() -> Self {
        Self::new(PathBuf::new(), RawKind::Rescan)
    }
}

/// State shared by both ends of a hint queue
#[derive(Debug, Default)]
struct HintShared {
    closed: AtomicBool,
    overflowed: AtomicBool,
    dropped: AtomicU64,
}

/// Create a bounded notification queue
pub fn hint_channel(capacity: usize) -> (HintSender, HintReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(HintShared::default());
    (
        HintSender {
            tx,
            shared: Arc::clone(&shared),
        },
        HintReceiver { rx, shared },
    )
}

/// Channel end a source delivers notifications into
#[derive(Debug, Clone)]
pub struct HintSender {
    tx: mpsc::Sender<RawNotification>,
    shared: Arc<HintShared>,
}

impl HintSender {
    /// Deliver a notification without blocking
    ///
    /// Returns `false` once the receiving session has ended. A full queue is
    /// not an error: the notification is dropped and a rescan is scheduled.
    pub fn send(&self, raw: RawNotification) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(raw) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.shared.overflowed.store(true, Ordering::Release);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Session end of a notification queue
#[derive(Debug)]
pub struct HintReceiver {
    rx: mpsc::Receiver<RawNotification>,
    shared: Arc<HintShared>,
}

impl HintReceiver {
    /// Next notification; a pending overflow is reported as one `Rescan`
    pub async fn recv(&mut self) -> Option<RawNotification> {
        if self.take_overflow() {
            return Some(RawNotification::rescan());
        }
        let raw = self.rx.recv().await?;
        if self.take_overflow() {
            // Everything is re-sampled anyway
            return Some(RawNotification::rescan());
        }
        Some(raw)
    }

    /// Handle that can shut the queue from outside the session loop
    pub fn closer(&self) -> HintCloser {
        HintCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of notifications dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn take_overflow(&self) -> bool {
        self.shared.overflowed.swap(false, Ordering::AcqRel)
    }
}

impl Drop for HintReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Rejects all further sends on a hint queue
#[derive(Debug, Clone)]
pub struct HintCloser {
    shared: Arc<HintShared>,
}

impl HintCloser {
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Capability to subscribe to change notifications for a path
///
/// Subscribing to a directory reports changes to its entries.
pub trait NotificationSource: Send {
    fn subscribe(&mut self, path: &Path, recursive: bool) -> anyhow::Result<()>;

    fn unsubscribe(&mut self, path: &Path) -> anyhow::Result<()>;
}

/// Builds a notification source for a new watch session
pub type SourceFactory =
    Arc<dyn Fn(HintSender) -> anyhow::Result<Box<dyn NotificationSource>> + Send + Sync>;

/// Factory for the platform's recommended native watcher
pub fn native_factory() -> SourceFactory {
    Arc::new(|tx: HintSender| -> anyhow::Result<Box<dyn NotificationSource>> {
        Ok(Box::new(NotifySource::new(tx)?))
    })
}

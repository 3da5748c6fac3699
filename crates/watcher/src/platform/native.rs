//! Native OS notifications via `notify`
//!
//! inotify on Linux, FSEvents on macOS, ReadDirectoryChangesW on Windows.

use super::{HintSender, NotificationSource, RawKind, RawNotification};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Notification source backed by the platform's recommended watcher
pub struct NotifySource {
    watcher: RecommendedWatcher,

    /// Subscription count per path; several watched files may share a parent
    subscriptions: HashMap<PathBuf, usize>,
}

impl NotifySource {
    pub fn new(tx: HintSender) -> notify::Result<Self> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in translate(event) {
                    // Rejected means the session ended
                    if !tx.send(raw) {
                        break;
                    }
                }
            }
            Err(e) => warn!("Native watcher error: {}", e),
        })?;

        Ok(Self {
            watcher,
            subscriptions: HashMap::new(),
        })
    }
}

impl NotificationSource for NotifySource {
    fn subscribe(&mut self, path: &Path, recursive: bool) -> anyhow::Result<()> {
        if let Some(count) = self.subscriptions.get_mut(path) {
            *count += 1;
            return Ok(());
        }

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher.watch(path, mode)?;
        self.subscriptions.insert(path.to_path_buf(), 1);
        debug!("Native watch on {}", path.display());
        Ok(())
    }

    fn unsubscribe(&mut self, path: &Path) -> anyhow::Result<()> {
        let Some(count) = self.subscriptions.get_mut(path) else {
            return Ok(());
        };

        *count -= 1;
        if *count == 0 {
            self.subscriptions.remove(path);
            self.watcher.unwatch(path)?;
        }
        Ok(())
    }
}

/// Map a notify event to raw notifications
fn translate(event: Event) -> Vec<RawNotification> {
    if event.need_rescan() {
        return vec![RawNotification::new(PathBuf::new(), RawKind::Rescan)];
    }

    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => tag_all(paths, RawKind::Created),
        EventKind::Remove(_) => tag_all(paths, RawKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            let from = paths[0].clone();
            let to = paths[1].clone();
            vec![
                RawNotification::new(from.clone(), RawKind::RenamedFrom),
                RawNotification::new(to, RawKind::RenamedTo { from: Some(from) }),
            ]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => tag_all(paths, RawKind::RenamedFrom),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tag_all(paths, RawKind::RenamedTo { from: None })
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            tag_all(paths, RawKind::Modified)
        }
    }
}

fn tag_all(paths: Vec<PathBuf>, kind: RawKind) -> Vec<RawNotification> {
    paths
        .into_iter()
        .map(|path| RawNotification::new(path, kind.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, Flag, RemoveKind};

    #[test]
    fn test_translate_basic_kinds() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a".into());
        assert_eq!(translate(created), vec![RawNotification::new("/w/a", RawKind::Created)]);

        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/w/a".into());
        assert_eq!(translate(written), vec![RawNotification::new("/w/a", RawKind::Modified)]);

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/w/a".into());
        assert_eq!(translate(removed), vec![RawNotification::new("/w/a", RawKind::Removed)]);

        let read = Event::new(EventKind::Access(AccessKind::Any)).add_path("/w/a".into());
        assert!(translate(read).is_empty());
    }

    #[test]
    fn test_translate_rename_pair() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/w/.a.tmp.1".into())
            .add_path("/w/a".into());

        assert_eq!(
            translate(event),
            vec![
                RawNotification::new("/w/.a.tmp.1", RawKind::RenamedFrom),
                RawNotification::new(
                    "/w/a",
                    RawKind::RenamedTo {
                        from: Some(PathBuf::from("/w/.a.tmp.1"))
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_translate_rescan() {
        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let raws = translate(event);
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].kind, RawKind::Rescan);
    }

    #[test]
    fn test_subscription_refcount() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let (tx, _rx) = crate::platform::hint_channel(8);
        let mut source = NotifySource::new(tx).unwrap();

        source.subscribe(temp_dir.path(), false).unwrap();
        source.subscribe(temp_dir.path(), false).unwrap();
        source.unsubscribe(temp_dir.path()).unwrap();
        assert!(source.subscriptions.contains_key(temp_dir.path()));

        source.unsubscribe(temp_dir.path()).unwrap();
        assert!(source.subscriptions.is_empty());
    }
}

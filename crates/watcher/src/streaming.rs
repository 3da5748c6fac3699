//! Streaming-write detection
//!
//! Classifies each sample of a path as "still being written" or "complete"
//! by comparing size and mtime against the previous sample.
//!
//! Per-path lifecycle:
//! - Unseen: no state. First present sample -> Observed (streaming).
//! - Observed: a changed sample resets the stable count; an unchanged poll
//!   sample increments it. Reaching the threshold -> Stable.
//! - Stable: a changed sample -> Observed again; a missing sample -> removed.
//!
//! A file is never reported complete on its first sample, even if the writer
//! finished between two polls.

use settle_core::{ChangeEvent, OperationType};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

/// One size/mtime observation of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Present {
        size: u64,
        mtime: Option<SystemTime>,
    },
    Missing,
}

impl Sample {
    pub fn present(size: u64, mtime: Option<SystemTime>) -> Self {
        Sample::Present { size, mtime }
    }
}

/// What a sample did to the path's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First sample of a previously unseen path
    Appeared,
    /// Size or mtime differs from the previous sample
    Changed,
    /// Unchanged, but not yet stable
    Pending,
    /// Reached the stability threshold on this sample
    Settled,
    /// Unchanged and already stable
    Steady,
    /// Tracked path is gone; its state was discarded
    Vanished,
    /// Missing and never tracked
    Absent,
}

/// Result of feeding one sample to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub transition: Transition,
    pub is_streaming: bool,
    pub size: Option<u64>,
    /// Size before the current run began
    pub previous_size: Option<u64>,
    /// Operation that started the current streaming run
    pub origin: OperationType,
    pub renamed_from: Option<PathBuf>,
}

impl Classification {
    fn gone(transition: Transition, previous_size: Option<u64>) -> Self {
        Self {
            transition,
            is_streaming: false,
            size: None,
            previous_size,
            origin: OperationType::Deleted,
            renamed_from: None,
        }
    }

    /// Whether this transition is reported downstream
    pub fn is_reportable(&self) -> bool {
        matches!(
            self.transition,
            Transition::Appeared | Transition::Changed | Transition::Settled | Transition::Vanished
        )
    }

    /// Build the change event for a reportable transition
    pub fn to_event(&self, path: &Path) -> Option<ChangeEvent> {
        match self.transition {
            Transition::Vanished => Some(ChangeEvent::deleted(path)),
            Transition::Appeared | Transition::Changed | Transition::Settled => Some(
                ChangeEvent::new(path, self.origin, self.is_streaming, self.size)
                    .with_previous_size(self.previous_size)
                    .with_renamed_from(self.renamed_from.clone()),
            ),
            Transition::Pending | Transition::Steady | Transition::Absent => None,
        }
    }
}

#[derive(Debug)]
struct StreamingState {
    last_size: u64,
    last_mtime_observed: Option<SystemTime>,
    /// Consecutive poll samples with no size/mtime change
    stable_count: u32,
    first_seen_at: Instant,
    settled: bool,
    origin: OperationType,
    renamed_from: Option<PathBuf>,
    /// Size before the current run began; `None` for a file that appeared
    run_start_size: Option<u64>,
}

/// Per-path streaming state machine, owned by one watch session
#[derive(Debug)]
pub struct StreamingStateTracker {
    threshold: u32,
    states: HashMap<PathBuf, StreamingState>,
}

impl StreamingStateTracker {
    /// Create a tracker; a threshold of 0 is treated as 1
    pub fn new(stability_threshold: u32) -> Self {
        Self {
            threshold: stability_threshold.max(1),
            states: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record a pre-existing file as already stable, without reporting it
    pub fn prime(&mut self, path: PathBuf, size: u64, mtime: Option<SystemTime>) {
        self.states.insert(
            path,
            StreamingState {
                last_size: size,
                last_mtime_observed: mtime,
                stable_count: self.threshold,
                first_seen_at: Instant::now(),
                settled: true,
                origin: OperationType::Modified,
                renamed_from: None,
                run_start_size: Some(size),
            },
        );
    }

    /// Feed a periodic poll sample
    pub fn sample(&mut self, path: &Path, sample: Sample) -> Classification {
        self.observe(path, sample, true, None)
    }

    /// Feed a sample triggered by a change notification
    ///
    /// Detects changes like a poll sample but never advances the stable
    /// count, so bursts of notifications cannot settle a file early.
    pub fn hint(
        &mut self,
        path: &Path,
        sample: Sample,
        renamed_from: Option<PathBuf>,
    ) -> Classification {
        self.observe(path, sample, false, renamed_from)
    }

    fn observe(
        &mut self,
        path: &Path,
        sample: Sample,
        counts_toward_stability: bool,
        renamed_from: Option<PathBuf>,
    ) -> Classification {
        let (size, mtime) = match sample {
            Sample::Missing => {
                return match self.states.remove(path) {
                    Some(state) => Classification::gone(Transition::Vanished, Some(state.last_size)),
                    None => Classification::gone(Transition::Absent, None),
                };
            }
            Sample::Present { size, mtime } => (size, mtime),
        };

        let state = match self.states.entry(path.to_path_buf()) {
            Entry::Vacant(vacant) => {
                let origin = if renamed_from.is_some() {
                    OperationType::Renamed
                } else {
                    OperationType::Created
                };
                vacant.insert(StreamingState {
                    last_size: size,
                    last_mtime_observed: mtime,
                    stable_count: 0,
                    first_seen_at: Instant::now(),
                    settled: false,
                    origin,
                    renamed_from: renamed_from.clone(),
                    run_start_size: None,
                });
                return Classification {
                    transition: Transition::Appeared,
                    is_streaming: true,
                    size: Some(size),
                    previous_size: None,
                    origin,
                    renamed_from,
                };
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        let changed = size != state.last_size || mtime != state.last_mtime_observed;

        let transition = if changed {
            if state.settled {
                state.settled = false;
                state.origin = OperationType::Modified;
                state.renamed_from = None;
                state.run_start_size = Some(state.last_size);
            }
            if renamed_from.is_some() {
                state.origin = OperationType::Renamed;
                state.renamed_from = renamed_from;
            }
            state.last_size = size;
            state.last_mtime_observed = mtime;
            state.stable_count = 0;
            Transition::Changed
        } else if state.settled {
            Transition::Steady
        } else if counts_toward_stability {
            state.stable_count += 1;
            if state.stable_count >= self.threshold {
                state.settled = true;
                Transition::Settled
            } else {
                Transition::Pending
            }
        } else {
            Transition::Pending
        };

        Classification {
            transition,
            is_streaming: !state.settled,
            size: Some(size),
            previous_size: state.run_start_size,
            origin: state.origin,
            renamed_from: state.renamed_from.clone(),
        }
    }

    /// Drop the state for one path
    pub fn forget(&mut self, path: &Path) -> bool {
        self.states.remove(path).is_some()
    }

    /// Drop all per-path state
    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.states.contains_key(path)
    }

    /// `Some(true)` while the path is streaming, `None` if untracked
    pub fn is_streaming(&self, path: &Path) -> Option<bool> {
        self.states.get(path).map(|s| !s.settled)
    }

    /// When the path was first observed in this session
    pub fn first_seen_at(&self, path: &Path) -> Option<Instant> {
        self.states.get(path).map(|s| s.first_seen_at)
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.states.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

//! Per-file size-stability state machine.
//!
//! Time is always passed in by the caller, so the tracker never reads a clock
//! and can be driven with synthetic instants in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Still being written, or not yet unchanged for the full threshold.
    Pending,
    /// Unchanged for at least the threshold; eligible for archiving.
    Stable,
    /// Handed off and finished; the entry leaves the tracking set.
    Archived,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Stable => "stable",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub relative_path: PathBuf,
    pub last_known_size: u64,
    pub unchanged_since: Instant,
    pub state: FileState,
}

/// What a single observation did to a file's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First sighting; a fresh `Pending` entry was created.
    FirstSeen,
    /// Size differs from the last sample; the stability clock restarted.
    SizeChanged { previous: u64 },
    /// Unchanged, but not for long enough yet.
    Waiting,
    /// Crossed the threshold on this observation. Fires once per entry.
    BecameStable,
    /// Already `Stable` from an earlier cycle whose archive attempt failed.
    StillStable,
}

impl Transition {
    /// Whether the file should be offered for archiving this cycle.
    pub fn is_candidate(&self) -> bool {
        matches!(self, Transition::BecameStable | Transition::StillStable)
    }
}

pub struct StabilityTracker {
    threshold: Duration,
    files: HashMap<PathBuf, TrackedFile>,
}

impl StabilityTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            files: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Feed one size sample. The threshold boundary is inclusive.
    pub fn observe(&mut self, relative_path: &Path, current_size: u64, now: Instant) -> Transition {
        let Some(file) = self.files.get_mut(relative_path) else {
            self.files.insert(
                relative_path.to_path_buf(),
                TrackedFile {
                    relative_path: relative_path.to_path_buf(),
                    last_known_size: current_size,
                    unchanged_since: now,
                    state: FileState::Pending,
                },
            );
            return Transition::FirstSeen;
        };

        if current_size != file.last_known_size {
            let previous = file.last_known_size;
            file.last_known_size = current_size;
            file.unchanged_since = now;
            file.state = FileState::Pending;
            return Transition::SizeChanged { previous };
        }

        match file.state {
            FileState::Stable => Transition::StillStable,
            _ if now.saturating_duration_since(file.unchanged_since) >= self.threshold => {
                file.state = FileState::Stable;
                Transition::BecameStable
            }
            _ => Transition::Waiting,
        }
    }

    /// Finish a file that was archived or found to be a duplicate. The entry
    /// is dropped, so a later file with the same name starts over as new.
    pub fn mark_archived(&mut self, relative_path: &Path) -> Option<TrackedFile> {
        self.files.remove(relative_path).map(|mut file| {
            file.state = FileState::Archived;
            file
        })
    }

    /// Drop a file that vanished from the monitored directory.
    pub fn forget(&mut self, relative_path: &Path) -> Option<TrackedFile> {
        self.files.remove(relative_path)
    }

    pub fn get(&self, relative_path: &Path) -> Option<&TrackedFile> {
        self.files.get(relative_path)
    }

    pub fn state(&self, relative_path: &Path) -> Option<FileState> {
        self.files.get(relative_path).map(|f| f.state)
    }

    /// Tracked paths in sorted order.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

use crate::archive::ArchiveWriter;
use crate::config::Settings;
use crate::error::{Error, ErrorClass, Result};
use crate::events::EventReporter;
use crate::hasher::ContentHash;
use crate::scanner::{self, ListedFile};
use crate::stability::{StabilityTracker, Transition};
use crate::storage::{BackupRecord, HashIndex};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// One polling pass over the monitored directory.
///
/// Owns all mutable monitoring state: the stability tracker and the durable
/// hash index. Nothing here is global, so cycles can be driven with
/// synthetic instants.
pub struct ScanCycle {
    monitor_dir: PathBuf,
    extensions: Vec<String>,
    tracker: StabilityTracker,
    writer: ArchiveWriter,
    index: HashIndex,
}

/// A per-file (or listing) failure collected during a cycle.
#[derive(Debug, Clone)]
pub struct ScanError {
    pub relative_path: Option<PathBuf>,
    pub class: ErrorClass,
    pub message: String,
}

impl ScanError {
    fn new(relative_path: Option<&Path>, err: &Error) -> Self {
        Self {
            relative_path: relative_path.map(Path::to_path_buf),
            class: err.class(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub listed: usize,
    pub archived: Vec<BackupRecord>,
    pub skipped_duplicate: Vec<PathBuf>,
    pub forgotten: Vec<PathBuf>,
    pub errors: Vec<ScanError>,
    pub duration: Duration,
}

impl ScanResult {
    pub fn has_store_corruption(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.class == ErrorClass::StoreCorruption)
    }
}

enum Outcome {
    Archived(BackupRecord),
    Duplicate(ContentHash),
}

impl ScanCycle {
    pub fn new(settings: &Settings, index: HashIndex) -> Self {
        Self {
            monitor_dir: settings.monitor_dir.clone(),
            extensions: settings.extensions.clone(),
            tracker: StabilityTracker::new(settings.stable_threshold),
            writer: ArchiveWriter::new(settings.destination_root(), settings.verify_copies),
            index,
        }
    }

    /// Run one pass at logical time `now`:
    /// 1. List matching files and feed their sizes to the tracker
    /// 2. Forget tracked files that are gone
    /// 3. Hash each candidate, skip known content, archive the rest
    ///
    /// Per-file failures are collected; they never abort the pass.
    pub fn run_once(&mut self, now: Instant, reporter: &dyn EventReporter) -> ScanResult {
        let started = Instant::now();
        let mut result = ScanResult::default();

        let listing = match scanner::list_matching_files(&self.monitor_dir, &self.extensions) {
            Ok(listing) => listing,
            Err(e) => {
                let err = Error::transient("list", &self.monitor_dir, e);
                let scan_error = ScanError::new(None, &err);
                reporter.on_error(&scan_error);
                result.errors.push(scan_error);
                result.duration = started.elapsed();
                reporter.on_cycle_complete(&result);
                return result;
            }
        };
        result.listed = listing.len();

        let candidates = self.observe_listing(&listing, now, reporter);
        result.forgotten = self.forget_missing(&listing, reporter);

        for file in candidates {
            match self.process_candidate(file) {
                Ok(Outcome::Archived(record)) => {
                    self.tracker.mark_archived(&file.relative_path);
                    reporter.on_archived(&record);
                    result.archived.push(record);
                }
                Ok(Outcome::Duplicate(hash)) => {
                    self.tracker.mark_archived(&file.relative_path);
                    reporter.on_skipped_duplicate(&file.relative_path, &hash.to_hex());
                    result.skipped_duplicate.push(file.relative_path.clone());
                }
                Err(err) => {
                    // Left Stable: retried next cycle without a new waiting period
                    let scan_error = ScanError::new(Some(&file.relative_path), &err);
                    reporter.on_error(&scan_error);
                    result.errors.push(scan_error);
                }
            }
        }

        result.duration = started.elapsed();
        reporter.on_cycle_complete(&result);
        result
    }

    fn observe_listing<'a>(
        &mut self,
        listing: &'a [ListedFile],
        now: Instant,
        reporter: &dyn EventReporter,
    ) -> Vec<&'a ListedFile> {
        let mut candidates = Vec::new();
        for file in listing {
            let transition = self.tracker.observe(&file.relative_path, file.size, now);
            match transition {
                Transition::FirstSeen => reporter.on_first_seen(&file.relative_path, file.size),
                Transition::SizeChanged { previous } => {
                    reporter.on_size_changed(&file.relative_path, previous, file.size)
                }
                Transition::Waiting => {
                    trace!("{} size stable at {}", file.relative_path.display(), file.size)
                }
                Transition::BecameStable => reporter.on_stable(&file.relative_path, file.size),
                Transition::StillStable => {
                    debug!("Retrying stable file {}", file.relative_path.display())
                }
            }
            if transition.is_candidate() {
                candidates.push(file);
            }
        }
        candidates
    }

    fn forget_missing(
        &mut self,
        listing: &[ListedFile],
        reporter: &dyn EventReporter,
    ) -> Vec<PathBuf> {
        let present: HashSet<&Path> = listing.iter().map(|f| f.relative_path.as_path()).collect();
        let mut forgotten = Vec::new();
        for path in self.tracker.tracked_paths() {
            if !present.contains(path.as_path()) {
                self.tracker.forget(&path);
                reporter.on_removed(&path);
                forgotten.push(path);
            }
        }
        forgotten
    }

    fn process_candidate(&mut self, file: &ListedFile) -> Result<Outcome> {
        let hash = self.writer.content_hash(&file.path)?;
        let key = file.relative_path.to_string_lossy();

        if self.index.exists(&key, &hash)? {
            debug!(
                "Skipped {}; already backed up with same content ({})",
                file.relative_path.display(),
                hash
            );
            return Ok(Outcome::Duplicate(hash));
        }

        let record = self
            .writer
            .archive_with_hash(&file.path, &file.relative_path, &hash, &mut self.index)?;
        Ok(Outcome::Archived(record))
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    /// Flush the index and hand it back; used on shutdown.
    pub fn into_index(mut self) -> Result<HashIndex> {
        self.index.flush()?;
        Ok(self.index)
    }
}

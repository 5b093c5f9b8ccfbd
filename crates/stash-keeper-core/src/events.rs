use crate::engine::{ScanError, ScanResult};
use crate::storage::BackupRecord;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Receives one callback per per-file event of a scan cycle.
///
/// The CLI logs them through tracing; tests record them.
/// All methods have default no-op implementations.
pub trait EventReporter: Send + Sync {
    fn on_first_seen(&self, _relative_path: &Path, _size: u64) {}
    fn on_size_changed(&self, _relative_path: &Path, _previous: u64, _current: u64) {}
    fn on_stable(&self, _relative_path: &Path, _size: u64) {}
    fn on_archived(&self, _record: &BackupRecord) {}
    fn on_skipped_duplicate(&self, _relative_path: &Path, _hash: &str) {}
    fn on_removed(&self, _relative_path: &Path) {}
    fn on_error(&self, _error: &ScanError) {}
    fn on_cycle_complete(&self, _result: &ScanResult) {}
}

/// No-op reporter for silent operation.
pub struct SilentReporter;

impl EventReporter for SilentReporter {}

/// Emits every event as a structured tracing event.
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn on_first_seen(&self, relative_path: &Path, size: u64) {
        info!(path = %relative_path.display(), size, "Detected new file, starting monitoring");
    }

    fn on_size_changed(&self, relative_path: &Path, previous: u64, current: u64) {
        info!(
            path = %relative_path.display(),
            previous,
            current,
            "File size changed, resetting stability clock"
        );
    }

    fn on_stable(&self, relative_path: &Path, size: u64) {
        info!(path = %relative_path.display(), size, "File is stable");
    }

    fn on_archived(&self, record: &BackupRecord) {
        info!(
            path = %record.relative_path,
            hash = %record.content_hash,
            destination = %record.destination_path.display(),
            size = record.file_size,
            "Archived file"
        );
    }

    fn on_skipped_duplicate(&self, relative_path: &Path, hash: &str) {
        info!(
            path = %relative_path.display(),
            hash,
            "Skipped file, already backed up with same content"
        );
    }

    fn on_removed(&self, relative_path: &Path) {
        warn!(path = %relative_path.display(), "Tracked file disappeared, removing from tracking");
    }

    fn on_error(&self, err: &ScanError) {
        let path = err
            .relative_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        error!(path = %path, class = %err.class, "{}", err.message);
    }

    fn on_cycle_complete(&self, result: &ScanResult) {
        debug!(
            listed = result.listed,
            archived = result.archived.len(),
            skipped = result.skipped_duplicate.len(),
            forgotten = result.forgotten.len(),
            errors = result.errors.len(),
            "Scan cycle finished in {:.2}s",
            result.duration.as_secs_f64()
        );
    }
}

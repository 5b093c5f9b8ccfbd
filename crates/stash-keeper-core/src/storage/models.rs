use crate::hasher::ContentHash;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One archived content version of one monitored file.
///
/// `(relative_path, content_hash)` is unique in the store. Rows are written
/// once and never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub relative_path: String,
    pub content_hash: ContentHash,
    pub archived_at: DateTime<Utc>,
    pub destination_path: PathBuf,
    pub file_size: u64,
}

/// Aggregate view of the store, used by status reporting.
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub record_count: u64,
    pub distinct_paths: u64,
    pub total_bytes: u64,
    pub latest: Option<BackupRecord>,
}

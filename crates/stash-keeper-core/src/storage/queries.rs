use super::models::*;
use super::sqlite::HashIndex;
use crate::error::Result;
use crate::hasher::ContentHash;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;
use tracing::debug;

const RECORD_COLUMNS: &str =
    "relative_path, content_hash, archived_at, destination_path, file_size";

impl HashIndex {
    // ── Lookups ─────────────────────────────────────────────────

    /// Whether this exact content of `relative_path` was archived before.
    pub fn exists(&self, relative_path: &str, hash: &ContentHash) -> Result<bool> {
        let found = self
            .connection()
            .query_row(
                "SELECT 1 FROM backup_record WHERE relative_path = ?1 AND content_hash = ?2",
                params![relative_path, hash.to_hex()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn record_count(&self) -> Result<u64> {
        let count: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM backup_record", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every archived version of one path, oldest first.
    pub fn records_for_path(&self, relative_path: &str) -> Result<Vec<BackupRecord>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM backup_record WHERE relative_path = ?1 ORDER BY id ASC",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![relative_path], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Page through the store newest-first.
    pub fn list_records(&self, offset: u64, limit: u64) -> Result<Vec<BackupRecord>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM backup_record ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![limit as i64, offset as i64], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn latest_record(&self) -> Result<Option<BackupRecord>> {
        let record = self
            .connection()
            .query_row(
                &format!(
                    "SELECT {} FROM backup_record ORDER BY id DESC LIMIT 1",
                    RECORD_COLUMNS
                ),
                [],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let (record_count, distinct_paths, total_bytes): (i64, i64, i64) =
            self.connection().query_row(
                "SELECT COUNT(*), COUNT(DISTINCT relative_path), COALESCE(SUM(file_size), 0) \
                 FROM backup_record",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
        Ok(StoreSummary {
            record_count: record_count as u64,
            distinct_paths: distinct_paths as u64,
            total_bytes: total_bytes as u64,
            latest: self.latest_record()?,
        })
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Store a record. Re-inserting an existing `(relative_path, hash)` pair
    /// is a successful no-op; returns whether a new row was written.
    pub fn insert(&mut self, record: &BackupRecord) -> Result<bool> {
        let changed = self.connection().execute(
            "INSERT OR IGNORE INTO backup_record \
             (relative_path, content_hash, archived_at, destination_path, file_size) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.relative_path,
                record.content_hash.to_hex(),
                record.archived_at.to_rfc3339(),
                record.destination_path.to_string_lossy().into_owned(),
                record.file_size as i64,
            ],
        )?;
        if changed == 0 {
            debug!(
                "Record for {} ({}) already present",
                record.relative_path, record.content_hash
            );
            return Ok(false);
        }
        self.mark_dirty();
        Ok(true)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<BackupRecord> {
    let hash_text: String = row.get(1)?;
    let content_hash = hash_text
        .parse::<ContentHash>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let archived_text: String = row.get(2)?;
    let archived_at = DateTime::parse_from_rfc3339(&archived_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let destination: String = row.get(3)?;
    let file_size: i64 = row.get(4)?;

    Ok(BackupRecord {
        relative_path: row.get(0)?,
        content_hash,
        archived_at,
        destination_path: PathBuf::from(destination),
        file_size: file_size as u64,
    })
}

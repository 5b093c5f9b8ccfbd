use crate::error::{is_corruption, Error, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const SCHEMA_VERSION: i64 = 1;

/// Durable record of every `(relative_path, content_hash)` pair already
/// archived. Backed by a single SQLite file under the destination root.
///
/// Dropping the index flushes it, so state reaches disk on every exit path.
pub struct HashIndex {
    conn: Connection,
    path: Option<PathBuf>,
    dirty: bool,
}

impl HashIndex {
    /// Open the store at `path`, creating it if absent, and load whatever a
    /// previous run left there. A damaged or foreign file is reported as
    /// [`Error::StoreCorrupt`].
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| classify(path, e))?;
        let index = HashIndex {
            conn,
            path: Some(path.to_path_buf()),
            dirty: false,
        };
        index.configure_pragmas().map_err(|e| classify(path, e))?;
        index.check_integrity(path)?;
        index.migrate_schema(path)?;
        info!(
            "Loaded backup store {} ({} records)",
            path.display(),
            index.record_count()?
        );
        Ok(index)
    }

    /// Like [`HashIndex::open`], but when `rebuild` is set a corrupt store is
    /// moved aside and replaced with an empty one.
    pub fn open_or_rebuild(path: &Path, rebuild: bool) -> Result<Self> {
        match Self::open(path) {
            Err(Error::StoreCorrupt { reason, .. }) if rebuild => {
                let aside = quarantine(path)?;
                error!(
                    "Backup store {} was unreadable ({}); moved to {} and starting EMPTY. \
                     Files archived before now may be copied again.",
                    path.display(),
                    reason,
                    aside.display()
                );
                Self::open(path)
            }
            other => other,
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let index = HashIndex {
            conn,
            path: None,
            dirty: false,
        };
        index.configure_pragmas()?;
        index.migrate_schema(Path::new(":memory:"))?;
        Ok(index)
    }

    fn configure_pragmas(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, synchronous FULL)");
        Ok(())
    }

    fn check_integrity(&self, path: &Path) -> Result<()> {
        let problems = self.quick_check().map_err(|e| classify(path, e))?;

        if problems.len() == 1 && problems[0] == "ok" {
            Ok(())
        } else {
            Err(Error::StoreCorrupt {
                path: path.to_path_buf(),
                reason: problems.join("; "),
            })
        }
    }

    fn quick_check(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA quick_check")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let problems = rows.collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(problems)
    }

    /// Create the schema on a fresh store and refuse stores written by a
    /// newer schema or missing expected columns.
    fn migrate_schema(&self, path: &Path) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| classify(path, e))?;

        if version > SCHEMA_VERSION {
            return Err(Error::StoreCorrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "schema version {} is newer than supported version {}",
                    version, SCHEMA_VERSION
                ),
            });
        }

        self.conn
            .execute_batch(include_str!("schema.sql"))
            .map_err(|e| Error::StoreCorrupt {
                path: path.to_path_buf(),
                reason: format!("could not apply schema: {}", e),
            })?;
        if version < SCHEMA_VERSION {
            self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!("Backup store schema initialized (version {})", SCHEMA_VERSION);
        }

        self.conn
            .prepare(
                "SELECT relative_path, content_hash, archived_at, destination_path, file_size \
                 FROM backup_record LIMIT 0",
            )
            .map_err(|e| Error::StoreCorrupt {
                path: path.to_path_buf(),
                reason: format!("unexpected table layout: {}", e),
            })
            .map(|_| ())
    }

    /// Checkpoint the write-ahead log into the main store file.
    pub fn flush(&mut self) -> Result<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        self.dirty = false;
        if let Some(path) = &self.path {
            debug!("Flushed backup store {}", path.display());
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for HashIndex {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("Failed to flush backup store on close: {}", e);
            }
        }
    }
}

fn classify(path: &Path, err: rusqlite::Error) -> Error {
    if is_corruption(&err) {
        Error::StoreCorrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    } else {
        Error::Database(err)
    }
}

/// Rename a damaged store (and any WAL side files) out of the way.
fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".corrupt-{}", stamp));
    let aside = PathBuf::from(aside);
    fs::rename(path, &aside)?;

    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            let _ = fs::remove_file(&side);
        }
    }
    Ok(aside)
}

use crate::error::{Error, Result};
use crate::hasher::{self, ContentHash};
use crate::storage::{BackupRecord, HashIndex};
use chrono::Utc;
use filetime::FileTime;
use std::ffi::OsString;
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const VERSION_TAG_LENGTH: usize = 8;

/// Copies stable files into the destination tree and records them.
pub struct ArchiveWriter {
    destination_root: PathBuf,
    verify: bool,
}

impl ArchiveWriter {
    pub fn new(destination_root: impl Into<PathBuf>, verify: bool) -> Self {
        Self {
            destination_root: destination_root.into(),
            verify,
        }
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Stream `source` through the content hasher.
    pub fn content_hash(&self, source: &Path) -> Result<ContentHash> {
        hasher::hash_file(source).map_err(|e| Error::transient("hash", source, e))
    }

    /// Hash `source`, copy it to `destination_root/relative_path` and record
    /// the result in `index`.
    pub fn archive(
        &self,
        source: &Path,
        relative_path: &Path,
        index: &mut HashIndex,
    ) -> Result<BackupRecord> {
        let hash = self.content_hash(source)?;
        self.archive_with_hash(source, relative_path, &hash, index)
    }

    /// Archive `source`, whose content the caller already hashed as
    /// `expected`. The copy is rejected if the bytes read while copying hash
    /// differently, which means the source changed after it was judged stable.
    pub fn archive_with_hash(
        &self,
        source: &Path,
        relative_path: &Path,
        expected: &ContentHash,
        index: &mut HashIndex,
    ) -> Result<BackupRecord> {
        let metadata = fs::metadata(source).map_err(|e| Error::transient("stat", source, e))?;

        let mut target = self.destination_root.join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::transient("create directory", parent, e))?;
        }

        let mut reuse_existing = false;
        if target.exists() {
            if self.content_hash(&target)? == *expected {
                reuse_existing = true;
            } else {
                target = versioned_path(&target, expected);
                if target.exists() && self.content_hash(&target)? == *expected {
                    reuse_existing = true;
                }
            }
        }

        let file_size = if reuse_existing {
            debug!(
                "{} already holds this content, recording without copying",
                target.display()
            );
            metadata.len()
        } else {
            let copied = copy_with_metadata(source, &target, &metadata, expected)?;
            if self.verify {
                self.verify_copy(&target, expected)?;
            }
            copied
        };

        let record = BackupRecord {
            relative_path: relative_path.to_string_lossy().into_owned(),
            content_hash: *expected,
            archived_at: Utc::now(),
            destination_path: target,
            file_size,
        };
        index.insert(&record)?;
        Ok(record)
    }

    fn verify_copy(&self, target: &Path, expected: &ContentHash) -> Result<()> {
        let actual = self.content_hash(target)?;
        if actual == *expected {
            return Ok(());
        }
        if let Err(e) = fs::remove_file(target) {
            warn!("Could not remove mismatched copy {}: {}", target.display(), e);
        }
        Err(Error::VerificationFailed {
            path: target.to_path_buf(),
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        })
    }
}

/// Temporary sibling of the final destination; removed unless committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn beside(target: &Path) -> Self {
        let mut name = OsString::from(".");
        name.push(target.file_name().unwrap_or_default());
        name.push(".partial");
        Self {
            path: target.with_file_name(name),
            committed: false,
        }
    }

    fn commit(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Copy `source` to `target` via a temporary file, carrying over permission
/// bits and access/modification times. Returns the number of bytes copied.
fn copy_with_metadata(
    source: &Path,
    target: &Path,
    metadata: &Metadata,
    expected: &ContentHash,
) -> Result<u64> {
    let partial = PartialFile::beside(target);

    let reader = File::open(source).map_err(|e| Error::transient("open", source, e))?;
    let mut writer =
        File::create(&partial.path).map_err(|e| Error::transient("create", &partial.path, e))?;
    let (actual, copied) = hasher::copy_and_hash(reader, &mut writer)
        .map_err(|e| Error::transient("copy", source, e))?;
    writer
        .sync_all()
        .map_err(|e| Error::transient("sync", &partial.path, e))?;
    drop(writer);

    if actual != *expected {
        return Err(Error::transient(
            "copy",
            source,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "content changed after stabilizing (expected {}, read {})",
                    expected, actual
                ),
            ),
        ));
    }

    fs::set_permissions(&partial.path, metadata.permissions())
        .map_err(|e| Error::transient("set permissions on", &partial.path, e))?;
    filetime::set_file_times(
        &partial.path,
        FileTime::from_last_access_time(metadata),
        FileTime::from_last_modification_time(metadata),
    )
    .map_err(|e| Error::transient("set times on", &partial.path, e))?;

    partial
        .commit(target)
        .map_err(|e| Error::transient("rename into", target, e))?;
    Ok(copied)
}

/// `pkg.tgz` → `pkg.<hash prefix>.tgz`, for a new version of a name that is
/// already taken in the destination tree.
fn versioned_path(target: &Path, hash: &ContentHash) -> PathBuf {
    let tag = hash.short(VERSION_TAG_LENGTH);
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{}.{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}.{}", stem, tag),
    };
    target.with_file_name(name)
}

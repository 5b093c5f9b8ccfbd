use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

use stash_keeper_core::hasher::ContentHash;
use stash_keeper_core::storage::{BackupRecord, HashIndex};
use stash_keeper_core::{Error, ErrorClass};

fn make_test_record(path: &str, content: &[u8]) -> BackupRecord {
    BackupRecord {
        relative_path: path.to_string(),
        content_hash: ContentHash::of_bytes(content),
        archived_at: Utc::now(),
        destination_path: PathBuf::from("/dest/Saved").join(path),
        file_size: content.len() as u64,
    }
}

#[test]
fn test_insert_and_exists() {
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = make_test_record("build.tgz", b"package bytes");

    assert!(!index.exists("build.tgz", &record.content_hash).unwrap());
    assert!(index.insert(&record).unwrap());
    assert!(index.exists("build.tgz", &record.content_hash).unwrap());

    // Same hash at another path is a different key
    assert!(!index.exists("other.tgz", &record.content_hash).unwrap());
    assert_eq!(index.record_count().unwrap(), 1);
}

#[test]
fn test_duplicate_insert_is_noop() {
    let mut index = HashIndex::open_in_memory().unwrap();
    let first = make_test_record("build.tgz", b"v1");
    assert!(index.insert(&first).unwrap());

    let mut again = first.clone();
    again.destination_path = PathBuf::from("/elsewhere/build.tgz");
    assert!(!index.insert(&again).unwrap());

    let stored = index.records_for_path("build.tgz").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].destination_path, first.destination_path);
}

#[test]
fn test_new_content_adds_record_and_keeps_old() {
    let mut index = HashIndex::open_in_memory().unwrap();
    let v1 = make_test_record("build.tgz", b"v1");
    let v2 = make_test_record("build.tgz", b"v2");
    index.insert(&v1).unwrap();
    index.insert(&v2).unwrap();

    let history = index.records_for_path("build.tgz").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], v1);
    assert_eq!(history[1], v2);

    let newest = index.list_records(0, 1).unwrap();
    assert_eq!(newest, vec![v2.clone()]);
    assert_eq!(index.latest_record().unwrap(), Some(v2));
}

#[test]
fn test_summary() {
    let mut index = HashIndex::open_in_memory().unwrap();
    assert_eq!(index.summary().unwrap().record_count, 0);
    assert!(index.summary().unwrap().latest.is_none());

    index.insert(&make_test_record("a.tgz", b"aaaa")).unwrap();
    index.insert(&make_test_record("a.tgz", b"bb")).unwrap();
    index.insert(&make_test_record("b.tgz", b"c")).unwrap();

    let summary = index.summary().unwrap();
    assert_eq!(summary.record_count, 3);
    assert_eq!(summary.distinct_paths, 2);
    assert_eq!(summary.total_bytes, 7);
    assert_eq!(summary.latest.unwrap().relative_path, "b.tgz");
}

#[test]
fn test_records_survive_reopen() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backup_state.sqlite");
    let record = make_test_record("build.tgz", b"durable");

    {
        let mut index = HashIndex::open(&path).unwrap();
        index.insert(&record).unwrap();
        index.flush().unwrap();
    }

    let index = HashIndex::open(&path).unwrap();
    assert!(index.exists("build.tgz", &record.content_hash).unwrap());
    assert_eq!(index.records_for_path("build.tgz").unwrap(), vec![record]);
}

#[test]
fn test_drop_without_explicit_flush_persists() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backup_state.sqlite");
    let record = make_test_record("x.zip", b"dropped");

    {
        let mut index = HashIndex::open(&path).unwrap();
        index.insert(&record).unwrap();
    }

    let index = HashIndex::open(&path).unwrap();
    assert!(index.exists("x.zip", &record.content_hash).unwrap());
}

#[test]
fn test_garbage_store_is_corruption() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backup_state.sqlite");
    fs::write(&path, vec![0x42u8; 8192]).unwrap();

    let err = HashIndex::open(&path).err().expect("garbage must not open");
    assert!(matches!(err, Error::StoreCorrupt { .. }), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::StoreCorruption);
    // Refusing to proceed leaves the file untouched
    assert_eq!(fs::read(&path).unwrap(), vec![0x42u8; 8192]);
}

#[test]
fn test_rebuild_moves_corrupt_store_aside() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backup_state.sqlite");
    fs::write(&path, vec![0x42u8; 8192]).unwrap();

    let index = HashIndex::open_or_rebuild(&path, true).unwrap();
    assert_eq!(index.record_count().unwrap(), 0);
    drop(index);

    let quarantined: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
        .collect();
    assert_eq!(quarantined.len(), 1);
}

#[test]
fn test_newer_schema_version_refused() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backup_state.sqlite");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
    }

    let err = HashIndex::open(&path).err().expect("future schema must not open");
    assert!(matches!(err, Error::StoreCorrupt { .. }));
}

#[test]
fn test_foreign_table_layout_refused() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("backup_state.sqlite");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE backup_record (path TEXT PRIMARY KEY, md5 TEXT NOT NULL);",
        )
        .unwrap();
    }

    let err = HashIndex::open(&path).err().expect("wrong layout must not open");
    assert!(matches!(err, Error::StoreCorrupt { .. }));
}

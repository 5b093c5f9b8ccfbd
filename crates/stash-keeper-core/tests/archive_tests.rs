use filetime::FileTime;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use stash_keeper_core::hasher::{self, ContentHash};
use stash_keeper_core::{ArchiveWriter, Error, ErrorClass, HashIndex};

#[test]
fn test_archive_copies_and_records() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("build.tgz");
    fs::write(&source, b"slackware package").unwrap();

    let writer = ArchiveWriter::new(dest.path().join("Saved"), true);
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = writer
        .archive(&source, Path::new("build.tgz"), &mut index)
        .unwrap();

    let target = dest.path().join("Saved").join("build.tgz");
    assert_eq!(record.destination_path, target);
    assert_eq!(record.relative_path, "build.tgz");
    assert_eq!(record.file_size, 17);
    assert_eq!(record.content_hash, ContentHash::of_bytes(b"slackware package"));
    assert_eq!(fs::read(&target).unwrap(), b"slackware package");
    assert!(index.exists("build.tgz", &record.content_hash).unwrap());

    // No temporary file left behind
    let leftovers: Vec<_> = fs::read_dir(dest.path().join("Saved"))
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_archive_preserves_mtime() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("old.txz");
    fs::write(&source, b"old content").unwrap();
    let mtime = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&source, mtime).unwrap();

    let writer = ArchiveWriter::new(dest.path(), false);
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = writer
        .archive(&source, Path::new("old.txz"), &mut index)
        .unwrap();

    let copied = fs::metadata(&record.destination_path).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&copied), mtime);
}

#[cfg(unix)]
#[test]
fn test_archive_preserves_permission_bits() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("script.tgz");
    fs::write(&source, b"#!/bin/sh").unwrap();
    fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).unwrap();

    let writer = ArchiveWriter::new(dest.path(), true);
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = writer
        .archive(&source, Path::new("script.tgz"), &mut index)
        .unwrap();

    let mode = fs::metadata(&record.destination_path)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o640);
}

#[test]
fn test_archive_creates_intermediate_directories() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("pkg.tgz");
    fs::write(&source, b"nested").unwrap();

    let writer = ArchiveWriter::new(dest.path().join("a").join("b"), true);
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = writer
        .archive(&source, Path::new("sub/pkg.tgz"), &mut index)
        .unwrap();

    assert_eq!(
        record.destination_path,
        dest.path().join("a").join("b").join("sub").join("pkg.tgz")
    );
    assert!(record.destination_path.is_file());
}

#[test]
fn test_new_version_does_not_overwrite_previous_copy() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("build.tgz");
    let writer = ArchiveWriter::new(dest.path(), true);
    let mut index = HashIndex::open_in_memory().unwrap();

    fs::write(&source, b"version one").unwrap();
    let first = writer
        .archive(&source, Path::new("build.tgz"), &mut index)
        .unwrap();

    fs::write(&source, b"version two!").unwrap();
    let second = writer
        .archive(&source, Path::new("build.tgz"), &mut index)
        .unwrap();

    assert_ne!(first.destination_path, second.destination_path);
    assert_eq!(fs::read(&first.destination_path).unwrap(), b"version one");
    assert_eq!(fs::read(&second.destination_path).unwrap(), b"version two!");
    let name = second
        .destination_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(name, format!("build.{}.tgz", second.content_hash.short(8)));
    assert_eq!(index.records_for_path("build.tgz").unwrap().len(), 2);
}

#[test]
fn test_existing_identical_copy_is_reused() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("build.tgz");
    fs::write(&source, b"same bytes").unwrap();
    // Left over from a run whose store was lost
    fs::write(dest.path().join("build.tgz"), b"same bytes").unwrap();

    let writer = ArchiveWriter::new(dest.path(), true);
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = writer
        .archive(&source, Path::new("build.tgz"), &mut index)
        .unwrap();

    assert_eq!(record.destination_path, dest.path().join("build.tgz"));
    assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 1);
    assert_eq!(index.record_count().unwrap(), 1);
}

#[test]
fn test_changed_source_is_rejected() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("build.tgz");
    fs::write(&source, b"what it became").unwrap();
    let stale = ContentHash::of_bytes(b"what it was when judged stable");

    let writer = ArchiveWriter::new(dest.path(), true);
    let mut index = HashIndex::open_in_memory().unwrap();
    let err = writer
        .archive_with_hash(&source, Path::new("build.tgz"), &stale, &mut index)
        .err()
        .expect("stale hash must fail");

    assert_eq!(err.class(), ErrorClass::TransientIo);
    assert!(!dest.path().join("build.tgz").exists());
    assert!(!dest.path().join(".build.tgz.partial").exists());
    assert_eq!(index.record_count().unwrap(), 0);
}

#[test]
fn test_missing_source_is_transient() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let writer = ArchiveWriter::new(dest.path(), true);
    let mut index = HashIndex::open_in_memory().unwrap();

    let err = writer
        .archive(&src.path().join("vanished.tgz"), Path::new("vanished.tgz"), &mut index)
        .err()
        .expect("missing source must fail");
    assert!(matches!(err, Error::Transient { .. }));
    assert_eq!(err.class(), ErrorClass::TransientIo);
}

#[test]
fn test_large_file_hash_matches_copy() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let source = src.path().join("big.iso");
    let data: Vec<u8> = (0..(1024 * 1024 + 3)).map(|i| (i % 7) as u8).collect();
    fs::write(&source, &data).unwrap();

    let writer = ArchiveWriter::new(dest.path(), true);
    let mut index = HashIndex::open_in_memory().unwrap();
    let record = writer
        .archive(&source, Path::new("big.iso"), &mut index)
        .unwrap();

    assert_eq!(record.file_size, data.len() as u64);
    assert_eq!(
        hasher::hash_file(&record.destination_path).unwrap(),
        record.content_hash
    );
}

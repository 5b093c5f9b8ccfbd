use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A matching regular file directly under the monitored root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub relative_path: PathBuf,
    pub path: PathBuf,
    pub size: u64,
}

/// Lowercase `.ext` form used for every configured suffix.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim();
    let bare = trimmed.trim_start_matches('.');
    if bare.is_empty() || bare.contains(['/', '\\']) {
        return None;
    }
    Some(format!(".{}", bare.to_lowercase()))
}

/// Case-insensitive suffix match against already-normalized extensions.
pub fn matches_extension(file_name: &str, extensions: &[String]) -> bool {
    let lower = file_name.to_lowercase();
    extensions
        .iter()
        .any(|ext| lower.len() > ext.len() && lower.ends_with(ext.as_str()))
}

/// List entries directly under `root` whose names end with one of
/// `extensions`. Non-recursive. Symlinks are followed; directories are
/// skipped because their size says nothing about whether writing finished.
/// Entries whose metadata cannot be read are left out.
///
/// Fails only when `root` itself cannot be listed.
pub fn list_matching_files(root: &Path, extensions: &[String]) -> io::Result<Vec<ListedFile>> {
    // Surface an unreadable root as an error instead of an empty listing
    std::fs::read_dir(root)?;

    let mut listed = Vec::new();
    for entry_result in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    "Skipping unreadable entry {}: {}",
                    err.path().map(|p| p.display().to_string()).unwrap_or_default(),
                    err
                );
                continue;
            }
        };

        let file_name = entry.file_name().to_string_lossy();
        if !matches_extension(&file_name, extensions) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Could not read metadata for {}: {}", entry.path().display(), err);
                continue;
            }
        };

        if metadata.is_dir() {
            debug!(
                "Skipping matching directory {} (directories are not archived)",
                entry.path().display()
            );
            continue;
        }
        if !metadata.is_file() {
            continue;
        }

        let relative_path = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => PathBuf::from(entry.file_name()),
        };

        listed.push(ListedFile {
            relative_path,
            path: entry.path().to_path_buf(),
            size: metadata.len(),
        });
    }

    Ok(listed)
}

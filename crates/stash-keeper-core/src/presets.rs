//! Named groups of file extensions, e.g. "Slackware Packages".
//!
//! Stored one group per line as `Category Name,.ext1,.ext2`; blank lines and
//! `#` comments are ignored.

use crate::error::{Error, Result};
use crate::scanner::normalize_extension;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_PRESETS_FILE_NAME: &str = "file_type_presets.conf";
pub const SLACKWARE_PACKAGES: &str = "Slackware Packages";

const DEFAULT_PRESETS: &[(&str, &[&str])] = &[
    (SLACKWARE_PACKAGES, &[".tgz", ".tbz", ".tlz", ".txz"]),
    (
        "Disk Images",
        &[".iso", ".img", ".raw", ".qcow2", ".vdi", ".vmdk"],
    ),
    (
        "Documents",
        &[".pdf", ".txt", ".md", ".odt", ".doc", ".docx", ".rtf"],
    ),
    (
        "Images",
        &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".heic"],
    ),
    ("Audio", &[".mp3", ".wav", ".aac", ".flac", ".ogg"]),
    ("Video", &[".mp4", ".mkv", ".avi", ".mov", ".webm"]),
    (
        "Archives (General)",
        &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2"],
    ),
    (
        "Source Code",
        &[".py", ".c", ".cpp", ".java", ".js", ".html", ".css", ".sh"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPreset {
    pub name: String,
    pub extensions: Vec<String>,
}

/// Ordered collection of presets; names are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPresets {
    presets: Vec<ExtensionPreset>,
}

impl Default for ExtensionPresets {
    fn default() -> Self {
        Self {
            presets: DEFAULT_PRESETS
                .iter()
                .map(|(name, exts)| ExtensionPreset {
                    name: name.to_string(),
                    extensions: exts.iter().map(|e| e.to_string()).collect(),
                })
                .collect(),
        }
    }
}

impl ExtensionPresets {
    /// Load presets from `path`, falling back to the built-in set when the
    /// file is missing or holds no usable line.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "Presets file {} not found, using built-in presets",
                path.display()
            );
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let parsed = Self::parse(&text)?;
        if parsed.presets.is_empty() {
            warn!(
                "No valid presets in {}, using built-in presets",
                path.display()
            );
            return Ok(Self::default());
        }
        Ok(parsed)
    }

    /// Parse the presets file format. Malformed lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(text.as_bytes());

        let mut presets: Vec<ExtensionPreset> = Vec::new();
        for (line_num, record) in reader.records().enumerate() {
            let record = record.map_err(|e| Error::InvalidConfig(format!("presets: {}", e)))?;
            let Some(name) = record.get(0).filter(|n| !n.is_empty()) else {
                warn!("Missing category name on preset line {}, skipping", line_num + 1);
                continue;
            };
            let extensions: Vec<String> = record
                .iter()
                .skip(1)
                .filter(|e| e.starts_with('.'))
                .filter_map(normalize_extension)
                .collect();
            if extensions.is_empty() {
                warn!("No valid extensions for preset '{}', skipping", name);
                continue;
            }

            if let Some(existing) = presets.iter_mut().find(|p| p.name == name) {
                warn!("Duplicate preset name '{}', overwriting", name);
                existing.extensions = extensions;
            } else {
                presets.push(ExtensionPreset {
                    name: name.to_string(),
                    extensions,
                });
            }
        }
        Ok(Self { presets })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        writeln!(file, "# File Type Categories Configuration")?;
        writeln!(file, "# Format: Category Name,.ext1,.ext2,...")?;
        for preset in &self.presets {
            writeln!(file, "{},{}", preset.name, preset.extensions.join(","))?;
        }
        info!("Wrote extension presets to {}", path.display());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionPreset> {
        self.presets.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Union of the extensions of every named preset, in order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<String>> {
        let mut extensions: Vec<String> = Vec::new();
        for name in names {
            let preset = self.get(name).ok_or_else(|| {
                Error::InvalidConfig(format!("unknown extension preset '{}'", name))
            })?;
            for ext in &preset.extensions {
                if !extensions.contains(ext) {
                    extensions.push(ext.clone());
                }
            }
        }
        Ok(extensions)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionPreset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_skips_comments_and_bad_lines() {
        let text = "\
# comment line
Packages,.tgz,.TXZ

,.zip
Nothing,tgz,zip
Packages,.tlz
Images, .png , .jpg
";
        let presets = ExtensionPresets::parse(text).unwrap();
        assert_eq!(presets.len(), 2);
        // Duplicate name overwrote the first definition
        assert_eq!(presets.get("Packages").unwrap().extensions, vec![".tlz"]);
        assert_eq!(
            presets.get("images").unwrap().extensions,
            vec![".png", ".jpg"]
        );
    }

    #[test]
    fn test_resolve_unions_in_order() {
        let presets = ExtensionPresets::default();
        let exts = presets
            .resolve(&[SLACKWARE_PACKAGES.to_string(), "Archives (General)".to_string()])
            .unwrap();
        assert_eq!(&exts[..4], &[".tgz", ".tbz", ".tlz", ".txz"]);
        assert!(exts.contains(&".zip".to_string()));

        let err = presets.resolve(&["Nope".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join(DEFAULT_PRESETS_FILE_NAME);
        ExtensionPresets::default().save(&path).unwrap();
        let loaded = ExtensionPresets::load(&path).unwrap();
        assert_eq!(loaded, ExtensionPresets::default());
    }

    #[test]
    fn test_load_missing_or_empty_falls_back() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("missing.conf");
        assert_eq!(
            ExtensionPresets::load(&missing).unwrap(),
            ExtensionPresets::default()
        );

        let empty = tmp.path().join("empty.conf");
        fs::write(&empty, "# nothing here\n").unwrap();
        assert_eq!(
            ExtensionPresets::load(&empty).unwrap(),
            ExtensionPresets::default()
        );
    }
}

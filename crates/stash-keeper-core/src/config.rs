use crate::error::{Error, Result};
use crate::presets::{ExtensionPresets, DEFAULT_PRESETS_FILE_NAME, SLACKWARE_PACKAGES};
use crate::scanner::normalize_extension;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_STORE_FILE_NAME: &str = "backup_state.sqlite";
const WRITE_PROBE_NAME: &str = ".stash-keeper-write-probe";
/// Upper bound for the check interval and stability threshold (30 days).
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Configuration as read from files and the environment, before validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub monitor_dir: PathBuf,
    pub dest_base_dir: PathBuf,
    pub dest_subdir_name: String,
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub extension_presets: Vec<String>,
    #[serde(default)]
    pub presets_file: Option<PathBuf>,
    pub check_interval_secs: u64,
    pub stable_threshold_secs: u64,
    pub store_file_name: String,
    pub verify_copies: bool,
    pub rebuild_corrupt_store: bool,
}

/// Validated, immutable settings handed to the monitor.
#[derive(Debug, Clone)]
pub struct Settings {
    pub monitor_dir: PathBuf,
    pub dest_base_dir: PathBuf,
    pub dest_subdir_name: String,
    /// Lowercase, dot-prefixed; matched case-insensitively.
    pub extensions: Vec<String>,
    pub check_interval: Duration,
    pub stable_threshold: Duration,
    pub store_path: PathBuf,
    pub verify_copies: bool,
    pub rebuild_corrupt_store: bool,
}

impl Settings {
    pub fn destination_root(&self) -> PathBuf {
        self.dest_base_dir.join(&self.dest_subdir_name)
    }
}

/// Load configuration from defaults, `Config.toml` (or `path`) and
/// `STASH_*` environment variables, in increasing priority.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(p) => ConfigFile::from(p).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };
    let builder = Config::builder()
        .set_default("monitor_dir", "/tmp")?
        .set_default("dest_base_dir", "/opt/stor0")?
        .set_default("dest_subdir_name", "SavedCachedFiles")?
        .set_default("extension_presets", vec![SLACKWARE_PACKAGES.to_string()])?
        .set_default("check_interval_secs", 30)?
        .set_default("stable_threshold_secs", 120)?
        .set_default("store_file_name", DEFAULT_STORE_FILE_NAME)?
        .set_default("verify_copies", true)?
        .set_default("rebuild_corrupt_store", false)?
        .add_source(file_source)
        .add_source(
            Environment::with_prefix("STASH")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("file_extensions")
                .with_list_parse_key("extension_presets"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    /// Check every constraint and prepare the destination tree.
    pub fn validate(&self) -> Result<Settings> {
        if self.check_interval_secs == 0 || self.stable_threshold_secs == 0 {
            return Err(Error::InvalidConfig(
                "check interval and stability threshold must be positive".into(),
            ));
        }
        if self.check_interval_secs > MAX_DURATION_SECS
            || self.stable_threshold_secs > MAX_DURATION_SECS
        {
            return Err(Error::InvalidConfig(format!(
                "check interval and stability threshold must not exceed {}s",
                MAX_DURATION_SECS
            )));
        }
        if self.stable_threshold_secs < self.check_interval_secs {
            return Err(Error::InvalidConfig(format!(
                "stability threshold ({}s) must be at least the check interval ({}s)",
                self.stable_threshold_secs, self.check_interval_secs
            )));
        }

        let monitor_dir = validate_monitor_dir(&self.monitor_dir)?;
        let extensions = self.resolve_extensions()?;

        if !is_single_component(&self.dest_subdir_name) {
            return Err(Error::InvalidConfig(format!(
                "destination subdirectory name '{}' must be a single path component",
                self.dest_subdir_name
            )));
        }
        if !is_single_component(&self.store_file_name) {
            return Err(Error::InvalidConfig(format!(
                "store file name '{}' must be a plain file name",
                self.store_file_name
            )));
        }

        let destination_root = self.dest_base_dir.join(&self.dest_subdir_name);
        ensure_writable_dir(&destination_root)?;
        let dest_base_dir = fs::canonicalize(&self.dest_base_dir).map_err(|e| {
            Error::InvalidConfig(format!("{}: {}", self.dest_base_dir.display(), e))
        })?;

        Ok(Settings {
            monitor_dir,
            store_path: dest_base_dir.join(&self.store_file_name),
            dest_base_dir,
            dest_subdir_name: self.dest_subdir_name.clone(),
            extensions,
            check_interval: Duration::from_secs(self.check_interval_secs),
            stable_threshold: Duration::from_secs(self.stable_threshold_secs),
            verify_copies: self.verify_copies,
            rebuild_corrupt_store: self.rebuild_corrupt_store,
        })
    }

    /// Explicit extensions followed by those of every named preset,
    /// normalized and de-duplicated.
    pub fn resolve_extensions(&self) -> Result<Vec<String>> {
        let mut extensions: Vec<String> = Vec::new();
        for raw in &self.file_extensions {
            let ext = normalize_extension(raw).ok_or_else(|| {
                Error::InvalidConfig(format!("invalid file extension '{}'", raw))
            })?;
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }

        if !self.extension_presets.is_empty() {
            let presets = match &self.presets_file {
                Some(path) => ExtensionPresets::load(path)?,
                None => ExtensionPresets::load(Path::new(DEFAULT_PRESETS_FILE_NAME))?,
            };
            for ext in presets.resolve(&self.extension_presets)? {
                if !extensions.contains(&ext) {
                    extensions.push(ext);
                }
            }
        }

        if extensions.is_empty() {
            return Err(Error::InvalidConfig("no file extensions configured".into()));
        }
        Ok(extensions)
    }
}

fn validate_monitor_dir(dir: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(dir).map_err(|e| {
        Error::InvalidConfig(format!("monitored directory {}: {}", dir.display(), e))
    })?;
    if !canonical.is_dir() {
        return Err(Error::InvalidConfig(format!(
            "monitored path {} is not a directory",
            canonical.display()
        )));
    }
    fs::read_dir(&canonical).map_err(|e| {
        Error::InvalidConfig(format!(
            "monitored directory {} is not readable: {}",
            canonical.display(),
            e
        ))
    })?;
    Ok(canonical)
}

/// Create `dir` if needed and prove it accepts new files.
fn ensure_writable_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::InvalidConfig(format!(
            "could not create destination directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    let probe = dir.join(WRITE_PROBE_NAME);
    fs::write(&probe, b"").map_err(|e| {
        Error::InvalidConfig(format!(
            "destination directory {} is not writable: {}",
            dir.display(),
            e
        ))
    })?;
    let _ = fs::remove_file(&probe);
    debug!("Ensured destination directory exists: {}", dir.display());
    Ok(())
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod hasher;
pub mod monitor;
pub mod presets;
pub mod scanner;
pub mod stability;
pub mod storage;

pub use archive::ArchiveWriter;
pub use config::{AppConfig, Settings};
pub use engine::{ScanCycle, ScanError, ScanResult};
pub use error::{Error, ErrorClass};
pub use events::{EventReporter, LogReporter, SilentReporter};
pub use monitor::{Monitor, RunSummary, ShutdownSignal};
pub use presets::ExtensionPresets;
pub use stability::{FileState, StabilityTracker, Transition};
pub use storage::{BackupRecord, HashIndex};

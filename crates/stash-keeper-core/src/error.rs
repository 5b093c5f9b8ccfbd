use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Backup store {path} is unusable: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("Failed to {op} {path}: {source}")]
    Transient {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Copy of {path} does not match its source (expected {expected}, found {actual})")]
    VerificationFailed {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl Error {
    pub fn transient(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Transient {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => ErrorClass::Configuration,
            Error::StoreCorrupt { .. } => ErrorClass::StoreCorruption,
            Error::Database(e) if is_corruption(e) => ErrorClass::StoreCorruption,
            Error::Io(_)
            | Error::Database(_)
            | Error::Transient { .. }
            | Error::VerificationFailed { .. } => ErrorClass::TransientIo,
        }
    }
}

/// True for SQLite failures that mean the store file itself is damaged.
pub(crate) fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseCorrupt) | Some(rusqlite::ErrorCode::NotADatabase)
    )
}

/// How the monitor reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Logged; the affected file stays eligible and is retried next cycle.
    TransientIo,
    /// Fatal before the loop starts.
    Configuration,
    /// Fatal; the durable index cannot be trusted.
    StoreCorruption,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::TransientIo => "transient-io",
            ErrorClass::Configuration => "configuration",
            ErrorClass::StoreCorruption => "store-corruption",
        };
        f.write_str(name)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

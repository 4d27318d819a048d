use std::fmt;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// Which of the two index stores an operation was touching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Source,
    Destination,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Source => f.write_str("source"),
            StoreRole::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid resolution: {0} (must be a positive number of bytes)")]
    InvalidResolution(i64),

    #[error("malformed index entry for file {file_id} seq {seq}: {detail}")]
    MalformedEntry {
        file_id: String,
        seq: String,
        detail: String,
    },

    #[error("index equivalence check failed: {0}")]
    EquivalenceMismatch(String),

    #[error("{role} index store: failed to {operation}: {source}")]
    Store {
        role: StoreRole,
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("output already exists: {0:?}")]
    OutputExists(PathBuf),

    #[error("{role} index store {path:?}: failed to {operation}: {source}")]
    StoreIo {
        role: StoreRole,
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Adapter for `map_err` on SQLite calls.
    pub(crate) fn store(
        role: StoreRole,
        operation: &'static str,
    ) -> impl FnOnce(rusqlite::Error) -> Error {
        move |source| Error::Store {
            role,
            operation,
            source,
        }
    }

    /// Adapter for `map_err` on filesystem calls against a store file.
    pub(crate) fn store_io(
        role: StoreRole,
        operation: &'static str,
        path: &Path,
    ) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.to_path_buf();
        move |source| Error::StoreIo {
            role,
            operation,
            path,
            source,
        }
    }

    /// Short machine-readable name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidResolution(_) => "InvalidResolution",
            Error::MalformedEntry { .. } => "MalformedEntry",
            Error::EquivalenceMismatch(_) => "EquivalenceMismatch",
            Error::Store { .. } => "StoreError",
            Error::OutputExists(_) => "OutputExists",
            Error::StoreIo { .. } => "StoreIoError",
        }
    }
}

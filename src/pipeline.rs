//! End-to-end downsampling of an index database file.
//!
//! The destination is built next to the output as `<output>.partial`: the
//! source file is copied there, its blocks are replaced inside one
//! transaction, and the result is committed, vacuumed and renamed into place
//! only after the equivalence check passes. Any failure removes the partial
//! file, so an output path never holds an unverified index.

use crate::{
    Error, Result,
    error::StoreRole,
    downsample::{Downsampler, Resolution},
    storage::SqliteStorage,
    types::DownsampleReport,
};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix appended to the source path to name the default output.
pub const OUTPUT_SUFFIX: &str = ".downsampled";

const PARTIAL_SUFFIX: &str = ".partial";

/// `path` with `suffix` appended to its final component.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Removes the file on drop unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed partial index"),
            // copy never got as far as creating it
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to remove partial index"),
        }
    }
}

/// A single downsampling run from one database file to another.
#[derive(Debug, Clone)]
pub struct DownsampleJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub resolution: Resolution,
    pub overwrite: bool,
}

impl DownsampleJob {
    /// Job writing to the default `<source>.downsampled` output.
    pub fn new(source: impl Into<PathBuf>, resolution: Resolution) -> Self {
        let source = source.into();
        let output = with_suffix(&source, OUTPUT_SUFFIX);
        Self {
            source,
            output,
            resolution,
            overwrite: false,
        }
    }

    pub fn partial_path(&self) -> PathBuf {
        with_suffix(&self.output, PARTIAL_SUFFIX)
    }

    pub fn run(&self) -> Result<DownsampleReport> {
        if self.output.exists() && !self.overwrite {
            return Err(Error::OutputExists(self.output.clone()));
        }

        let source = SqliteStorage::open_source(&self.source)?;
        info!(source = ?self.source, output = ?self.output, "Opened source index");

        let partial_path = self.partial_path();
        if partial_path.exists() {
            warn!(path = ?partial_path, "Discarding stale partial index");
            fs::remove_file(&partial_path).map_err(Error::store_io(
                StoreRole::Destination,
                "remove stale partial index",
                &partial_path,
            ))?;
        }
        let partial = PartialFile::new(partial_path.clone());
        fs::copy(&self.source, &partial_path).map_err(Error::store_io(
            StoreRole::Destination,
            "copy source",
            &partial_path,
        ))?;

        let mut dest = SqliteStorage::open_destination(&partial_path)?;
        dest.begin()?;
        let report = Downsampler::new(self.resolution).run(&source, &mut dest)?;
        dest.commit()?;
        dest.vacuum()?;
        drop(dest);
        drop(source);

        fs::rename(&partial_path, &self.output).map_err(Error::store_io(
            StoreRole::Destination,
            "rename into place",
            &self.output,
        ))?;
        partial.disarm();
        info!(
            output = ?self.output,
            entries_in = report.entries_in,
            entries_out = report.entries_out,
            "Wrote downsampled index"
        );
        Ok(report)
    }
}

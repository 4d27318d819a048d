use crate::{
    Result,
    downsample::Resolution,
    pipeline::{DownsampleJob, OUTPUT_SUFFIX, with_suffix},
};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "htsnexus-downsample")]
#[command(about = "htsnexus index downsampler utility")]
pub struct Config {
    /// Target slice resolution in bytes
    #[arg(short, long, env = "HTSNEXUS_RESOLUTION", value_name = "SIZE", default_value = "262144", allow_negative_numbers = true)]
    pub resolution: i64,

    /// Index database file
    pub db: PathBuf,

    /// Output database file (default: <db>.downsampled)
    #[arg(short, long, env = "HTSNEXUS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Overwrite the output if it already exists
    #[arg(long)]
    pub force: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| with_suffix(&self.db, OUTPUT_SUFFIX))
    }

    pub fn resolution(&self) -> Result<Resolution> {
        Resolution::new(self.resolution)
    }

    /// Validate the configuration into a runnable job.
    pub fn job(&self) -> Result<DownsampleJob> {
        Ok(DownsampleJob {
            source: self.db.clone(),
            output: self.output_path(),
            resolution: self.resolution()?,
            overwrite: self.force,
        })
    }
}

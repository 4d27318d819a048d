pub mod config;
pub mod downsample;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::Config;
pub use downsample::{Downsampler, Resolution, verify_equivalence};
pub use error::{Error, Result};
pub use pipeline::DownsampleJob;

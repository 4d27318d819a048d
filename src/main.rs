use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use htsnexus::Config;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing; stdout is reserved for the JSON report
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let job = config.job()?;
    tracing::info!("Downsampling {:?} at {} bytes", job.source, job.resolution.bytes());

    let report = job
        .run()
        .inspect_err(|e| tracing::error!(kind = e.kind(), "Downsampling aborted: {}", e))
        .with_context(|| format!("failed to downsample {:?}", job.source))?;

    tracing::info!(
        "Reduced {} index entries to {} ({:.1}% fewer) across {} groups",
        report.entries_in,
        report.entries_out,
        report.reduction() * 100.0,
        report.groups.len()
    );

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

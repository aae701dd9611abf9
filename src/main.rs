use std::fs;

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use soundings::backend::Backend;
use soundings::config::Settings;
use soundings::error::Result;

/// Ingest samples into a soundings store and show what it holds.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file, read in addition to `SOUNDINGS__*` environment variables.
    #[arg(long)]
    config: Option<String>,
    /// Dataset to ingest into, as `name` or `name/subset`.
    #[arg(long, requires = "file")]
    ingest: Option<String>,
    /// JSON lines file with one sample per line.
    #[arg(long)]
    file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend = Backend::open(settings)?;

    if let (Some(target), Some(file)) = (&args.ingest, &args.file) {
        let (dataset, subset) = match target.split_once('/') {
            Some((dataset, subset)) => (dataset, Some(subset)),
            None => (target.as_str(), None),
        };
        let mut samples = Vec::new();
        for (number, line) in fs::read_to_string(file)?.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(file = %file, line = number + 1, error = %e, "skipping unreadable sample"),
            }
        }
        let report = backend.add_samples(dataset, subset, samples).await;
        println!(
            "ingested {} samples into {target} ({} dropped, {} chunks failed)",
            report.inserted.len(),
            report.dropped,
            report.failures.len()
        );
    }

    let tables = backend.tables().await?;
    info!(datasets = tables.len(), "listing datasets");
    for dataset in tables {
        let stats = backend.stats(&dataset.table_name).await?;
        println!("{} ({} samples, {} bytes)", dataset.table_name, stats.count, stats.size);
        let columns = backend.get_columns(&dataset.table_name).await?;
        for column in columns.columns() {
            match (column.min_value, column.max_value) {
                (Some(min), Some(max)) => {
                    println!("    {} {} [{min}, {max}]", column.inferred_type, column.name)
                }
                _ => println!("    {} {}", column.inferred_type, column.name),
            }
        }
    }
    Ok(())
}

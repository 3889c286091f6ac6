//! CLI driver (§6.2, ambient): load a job configuration, run it to
//! completion against a directory of price files, and persist passing
//! branches into a sqlite results database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stratsweep_engine::config::JobConfig;
use stratsweep_engine::engine::job::JobController;
use stratsweep_engine::engine::sink::SqliteSink;

#[derive(Parser, Debug)]
#[command(name = "stratsweep", author, version, about = "Systematic strategy-discovery sweep runner")]
struct Cli {
    /// Path to the job configuration (JSON or TOML, by extension).
    #[arg(short, long)]
    config: PathBuf,

    /// Directory of per-ticker price files (.parquet or .csv).
    #[arg(short, long)]
    price_dir: PathBuf,

    /// sqlite database to append passing branches to.
    #[arg(short, long, default_value = "stratsweep.db")]
    results_db: PathBuf,

    /// Log level, overridden by `RUST_LOG` if set.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading job config {}", cli.config.display()))?;
    let config = load_config(&cli.config, &raw).context("loading job configuration")?;

    tracing::info!(
        tickers = config.tickers.len(),
        total_branches = config.total_branches(),
        "starting job"
    );

    let sink = Arc::new(SqliteSink::open(&cli.results_db).context("opening results sink")?);
    let controller = JobController::new(config);
    let job_id = controller.id();

    let job = controller.run(&cli.price_dir, sink, |event| {
        tracing::info!(
            completed = event.completed_branches,
            total = event.total_branches,
            passing = event.passing_branches,
            "progress"
        );
    });

    tracing::info!(job_id = %job_id, status = ?job.status, completed = job.completed_branches, passing = job.passing_branches, "job finished");
    if let Some(error) = &job.error {
        tracing::error!(error, "job failed");
        anyhow::bail!("job {job_id} failed: {error}");
    }

    Ok(())
}

fn load_config(path: &std::path::Path, raw: &str) -> Result<JobConfig> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => JobConfig::from_toml(raw).map_err(Into::into),
        _ => JobConfig::from_json(raw).map_err(Into::into),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

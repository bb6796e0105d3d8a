//! coa-sync CLI: generate test account files or upload them to Xero.

use clap::{Parser, Subcommand};
use coa_sync::config::{GenerateConfig, TelemetrySettings, UploadConfig, split_file_list};
use coa_sync::engine::Dispatcher;
use coa_sync::generate::{generate_files, join_file_list, update_env_file};
use coa_sync::loader::load_all;
use coa_sync::telemetry::{TelemetryConfig, init_telemetry};
use coa_sync::upload::XeroUploader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "coa-sync", about = "Bulk chart-of-accounts upload to Xero")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload every account in the configured CSV files
    Upload {
        /// Number of workers (overrides WORKER_COUNT)
        #[arg(long)]
        workers: Option<usize>,
        /// Comma-separated CSV files (overrides FILES)
        #[arg(long)]
        files: Option<String>,
        /// Exit with an error if any record could not be uploaded
        #[arg(long)]
        strict: bool,
    },
    /// Generate synthetic account files and record them in .env
    Generate {
        /// Dotenv file that receives the FILES entry
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = TelemetrySettings::from_env();
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: settings.otel_endpoint,
        service_name: "coa-sync".to_string(),
        default_level: settings.log_level,
    })?;

    match cli.command {
        Command::Upload {
            workers,
            files,
            strict,
        } => cmd_upload(workers, files, strict).await,
        Command::Generate { env_file } => cmd_generate(env_file),
    }
}

async fn cmd_upload(
    workers: Option<usize>,
    files: Option<String>,
    strict: bool,
) -> anyhow::Result<()> {
    let mut config = UploadConfig::from_env()?;
    if let Some(workers) = workers {
        config.dispatch.worker_count = workers;
    }
    if let Some(ref files) = files {
        config.files = split_file_list(files);
    }

    if config.files.is_empty() {
        warn!("no input files configured, nothing to upload");
    }
    let records = load_all(&config.files);

    let uploader = Arc::new(XeroUploader::from_config(&config)?);
    let dispatcher = Dispatcher::new(config.dispatch, uploader)?;
    let report = dispatcher.run(records).await;

    for failed in report.records.iter().filter(|r| !r.outcome.is_success()) {
        warn!(
            code = %failed.code,
            attempts = failed.attempts,
            outcome = %failed.outcome,
            "record not uploaded"
        );
    }

    if strict && !report.is_success() {
        anyhow::bail!(
            "{} of {} records could not be uploaded",
            report.failed(),
            report.total()
        );
    }
    Ok(())
}

fn cmd_generate(env_file: PathBuf) -> anyhow::Result<()> {
    let config = GenerateConfig::from_env()?;
    let files = generate_files(&config, &mut rand::thread_rng())?;

    if files.is_empty() {
        info!("no files generated");
        return Ok(());
    }

    update_env_file(&env_file, "FILES", &join_file_list(&files))?;
    info!(files = files.len(), env_file = %env_file.display(), "recorded generated files");
    Ok(())
}

//! `ferry` moves batches of files into an S3 bucket.
//!
//! `ferry unzip` republishes every entry of the zip archives under the
//! configured source prefix; `ferry mirror` copies a remote SFTP tree. Both
//! write under a key stamped with today's date and exit non-zero if anything
//! failed.

mod error;
mod logging;

use crate::error::{ErrorKind, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use clap::{Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use ferry_config::Config;
use ferry_pipeline::{ArchiveKeys, ArchiveSource, MirrorKeys, Publisher, RunDate, RunSummary, TreeSource, run};
use ferry_remote::{CredentialProvider, SecretsManagerProvider, SftpFs, SftpOptions};
use ferry_storage::StoreHandle;
use ferry_storage::backend::S3Store;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Republish the entries of every archive under the source prefix
    Unzip,
    /// Copy every file under the remote SFTP root
    Mirror,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(logging::LogFormat::from_env());
    match execute(cli).await {
        Ok(summary) if summary.is_clean() => ExitCode::SUCCESS,
        Ok(summary) => {
            tracing::warn!(failures = summary.failures(), "Run finished with failures");
            ExitCode::FAILURE
        },
        Err(e) => {
            tracing::error!(error = ?e, "Run failed");
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: Cli) -> Result<RunSummary> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    // Captured once, so a run crossing midnight keeps a single date.
    let date = RunDate::today();
    let aws = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone())).load().await;
    let store = s3_store(&config, &aws)?;
    let publisher = Publisher::new(Arc::clone(&store));
    tracing::info!(command = ?cli.command, bucket = store.name(), %date, "Starting run");

    match cli.command {
        Command::Unzip => {
            let keys = ArchiveKeys::new(&config.unzip.source_prefix, config.unzip.destination_root.clone(), date);
            run(ArchiveSource::new(store, keys), publisher, config.run_options()).await.or_raise(|| ErrorKind::Run)
        },
        Command::Mirror => {
            config.validate_mirror().or_raise(|| ErrorKind::Config)?;
            let secret = config.mirror.secret_name.as_deref().ok_or_raise(|| ErrorKind::Config)?;
            let credentials = SecretsManagerProvider::new(aws_sdk_secretsmanager::Client::new(&aws))
                .fetch(secret)
                .await
                .or_raise(|| ErrorKind::Credentials)?;
            let options = SftpOptions::new(config.mirror.host.clone()).with_timeout(config.connect_timeout());
            let fs = SftpFs::connect(options, credentials).await.or_raise(|| ErrorKind::Connect)?;
            let keys = MirrorKeys::new(config.mirror.destination_root.clone(), date);
            let source = TreeSource::new(Arc::new(fs), config.mirror.root.clone(), keys);
            run(source, publisher, config.run_options()).await.or_raise(|| ErrorKind::Run)
        },
    }
}

fn s3_store(config: &Config, aws: &SdkConfig) -> Result<StoreHandle> {
    let bucket = config.bucket_name().ok_or_raise(|| ErrorKind::Config)?;
    let store = S3Store::new(bucket, aws_sdk_s3::config::Builder::from(aws), config.endpoint.clone())
        .with_page_size(config.page_size)
        .with_part_size(config.part_size);
    Ok(Arc::new(store))
}

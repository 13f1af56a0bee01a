use std::process::ExitCode;

use clap::Parser;

use lecture_archiver::archive::Archiver;
use lecture_archiver::config::{ArchiveConfig, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match ArchiveConfig::try_from(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&config.output_dir).await {
        tracing::error!(
            "cannot create output directory {}: {}",
            config.output_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let archiver = match Archiver::new(config) {
        Ok(archiver) => archiver,
        Err(e) => {
            tracing::error!("cannot build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    archiver.run().await;
    ExitCode::SUCCESS
}

use anyhow::Context;
use clap::Parser;
use codecollab_client_core::cli::{self, Cli};
use codecollab_client_core::telemetry::logging;
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logging::init(&log_config).context("logging initialization failed")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");
    cli::run(cli).await?;
    Ok(())
}

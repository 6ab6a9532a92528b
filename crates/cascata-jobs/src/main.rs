use std::process::ExitCode;

use anyhow::Context;
use cascata_jobs::config::WorkerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cascata_jobs=debug")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(event = "jobs.boot_failed", error = %err, "worker exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("load config")?;
    tracing::info!(
        event = "jobs.boot",
        webhook_concurrency = config.webhook_concurrency,
        push_concurrency = config.push_concurrency,
        "worker booting"
    );

    let state = cascata_jobs::build_state(config).await.context("build state")?;
    cascata_jobs::run_worker(state).await;

    Ok(())
}

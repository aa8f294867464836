use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hwc_logstream::checkpoint::TagCheckpointStore;
use hwc_logstream::config::Cli;
use hwc_logstream::logging;
use hwc_logstream::manager::StreamManager;
use hwc_logstream::output::StdoutSink;
use hwc_logstream::provider::{LogServiceClient, LtsClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = logging::init_logging(cli.log_dir.as_deref()).context("initialize logging")?;

    if let Err(e) = run(cli).await {
        error!("Application error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    cli.tailer.validate()?;
    let manager_config = cli.tailer.to_manager_config()?;
    let lts_config = cli.provider.to_lts_config()?;

    info!(
        endpoint = %lts_config.endpoint,
        project = %lts_config.project_id,
        workers = cli.tailer.worker_count,
        "Starting hwc-logstream"
    );

    let client: Arc<dyn LogServiceClient> =
        Arc::new(LtsClient::new(lts_config).context("create LTS client")?);
    let checkpoints = Arc::new(TagCheckpointStore::new(
        Arc::clone(&client),
        manager_config.tags.position_tag.clone(),
    ));
    let manager = StreamManager::new(client, checkpoints, Arc::new(StdoutSink), manager_config);

    let cancel = CancellationToken::new();
    if let Some(dir) = &cli.log_dir {
        logging::start_retention_cleanup(dir.clone(), cancel.clone());
    }
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    manager.start(cli.tailer.worker_count, cancel).await?;
    Ok(())
}

/// Cancel `cancel` on Ctrl-C, SIGINT or SIGTERM.
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

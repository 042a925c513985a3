//! Spotwait entrypoint: provision one spot instance, keep it until interrupted, then release it.

use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use spotwait::config::Config;
use spotwait::lifecycle::{ConsoleProgress, CoordinatorConfig, LifecycleCoordinator};
use spotwait::provider::build_provider;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let force_dry_run = std::env::args().any(|arg| arg == "--dry-run");
    let keep = std::env::args().any(|arg| arg == "--keep");

    let config = Config::from_env()?;
    config.validate()?;

    let mut coordinator_config = CoordinatorConfig::from_env()?;
    if force_dry_run {
        coordinator_config = coordinator_config.with_dry_run(true);
    }
    let verbose = coordinator_config.verbose();

    tracing::info!(
        provider = ?config.provider,
        instance_type = %config.instance_type,
        price = %config.bid_price,
        dry_run = coordinator_config.dry_run(),
        max_polls = coordinator_config.max_polls(),
        "spotwait starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let mut coordinator = LifecycleCoordinator::new(coordinator_config, build_provider(&config))?
        .with_cancellation(shutdown.clone());
    if verbose {
        coordinator = coordinator.with_progress(Arc::new(ConsoleProgress));
    }

    let handle = match coordinator.provision_instance(&config.bid_request()).await {
        Ok(handle) => handle,
        Err(err) => {
            if let Some(handle) = err.instance_left_running() {
                tracing::error!(
                    instance_id = %handle.instance_id,
                    request_id = handle.request_id.as_deref().unwrap_or("-"),
                    "Instance was left running; terminate it manually when done"
                );
            }
            for failure in err.cleanup_failures() {
                tracing::error!(error = %failure, "Cleanup did not complete");
            }
            return Err(err.into());
        }
    };

    tracing::info!(
        request_id = handle.request_id.as_deref().unwrap_or("-"),
        instance_id = %handle.instance_id,
        address = handle.public_address.as_deref().unwrap_or("-"),
        "Instance ready"
    );

    if keep {
        tracing::info!("--keep given; leaving instance running");
        return Ok(());
    }

    tracing::info!("Press Ctrl+C to cancel the bid and terminate the instance");
    shutdown.cancelled().await;

    coordinator.release(&handle).await?;
    tracing::info!(instance_id = %handle.instance_id, "Spot bid cancelled and instance terminated");
    Ok(())
}

async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }

    token.cancel();
}

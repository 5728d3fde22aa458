use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use subfleet_core::config::AppConfig;
use subfleet_core::encryption::CredentialCipher;
use subfleet_core::observability;
use subfleet_core::providers::Providers;

use subfleet_supervisor::enrichment::EnrichmentWorker;
use subfleet_supervisor::suggestions::SuggestionsWorker;
use subfleet_supervisor::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    observability::init_tracing(
        &config.observability.service_name,
        config.observability.otlp_endpoint.as_deref(),
        &config.observability.log_format,
    )?;

    info!(
        check_interval_secs = config.monitoring.check_interval.as_secs(),
        restart_cooldown_secs = config.monitoring.restart_cooldown.as_secs(),
        "supervisor starting"
    );

    let pool = subfleet_core::storage::initialize_pool(&config.database)
        .await
        .context("database connection failed")?;

    let cipher = CredentialCipher::from_env()?;
    let providers = Providers::from_config(&config.providers);

    let supervisor = Arc::new(Supervisor::new(pool.clone(), config.clone(), cipher));
    supervisor.reconcile_on_startup().await?;

    // Background cooperative tasks inside the supervisor process.
    if config.embedding_worker.enabled {
        let worker = Arc::new(EnrichmentWorker::new(
            pool.clone(),
            providers,
            config.embedding_worker.clone(),
        ));
        tokio::spawn(async move { worker.run().await });
    }

    if config.suggestions.enabled {
        let worker = Arc::new(SuggestionsWorker::new(
            pool.clone(),
            config.suggestions.clone(),
        ));
        tokio::spawn(async move { worker.run().await });
    }

    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run_monitor_loop().await });
    }

    observability::set_worker_ready(&config.observability.service_name, true);
    info!("supervisor running");

    shutdown_signal().await;

    info!("shutdown requested, stopping managed workers");
    supervisor.stop_all().await;
    observability::set_worker_ready(&config.observability.service_name, false);
    info!("supervisor stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

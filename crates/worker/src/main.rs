use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::info;

use subfleet_core::config::AppConfig;
use subfleet_core::observability;
use subfleet_core::retry::RetryPolicy;
use subfleet_reddit::client::RedditClient;

mod comments;
mod config;
mod cycle;
mod metadata;
mod metrics;
mod posts;
mod tracker;

/// Transport timeout for Reddit calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let app_config = AppConfig::from_env()?;
    let params = config::WorkerParams::from_env(&app_config.scraper)?;

    let service_name = format!("subfleet-worker-{}", params.primary);
    observability::init_tracing(
        &service_name,
        app_config.observability.otlp_endpoint.as_deref(),
        &app_config.observability.log_format,
    )?;

    info!(
        primary = %params.primary,
        scraper_type = params.scraper_type.as_str(),
        subreddits = params.subreddits.len(),
        posts_limit = params.posts_limit,
        interval_secs = params.scrape_interval_secs,
        "worker starting"
    );

    let pool = subfleet_core::storage::initialize_pool(&app_config.database)
        .await
        .context("database connection failed")?;

    let client = RedditClient::new(params.credentials.clone(), HTTP_TIMEOUT)?;

    // Credential check before entering the loop; also primes the
    // rate-limit snapshot.
    let me = client.me().await.context("Reddit authentication failed")?;
    info!(username = %me, "authenticated with Reddit");

    let ctx = cycle::WorkerCtx {
        pool,
        client,
        params,
        defaults: app_config.scraper.clone(),
        retry_policy: RetryPolicy::from_env_with_prefix("SCRAPER_RETRY"),
    };

    observability::set_worker_ready(&service_name, true);

    let shutdown = Arc::new(AtomicBool::new(false));
    let stop_notify = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        let stop_notify = stop_notify.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("stop signal received, finishing current write before exit");
            shutdown.store(true, Ordering::SeqCst);
            stop_notify.notify_waiters();
        });
    }

    cycle::run(ctx, shutdown, stop_notify).await;

    observability::set_worker_ready(&service_name, false);
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

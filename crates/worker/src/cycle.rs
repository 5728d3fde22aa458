//! The worker's cyclic state machine.
//!
//! A posts worker runs the full sequence per cycle: multi-sort post
//! harvest, priority-ordered comment refresh, gated community metadata
//! refresh, metrics flush. A comments worker runs only the refresh and
//! flush phases. Phases execute strictly sequentially; the comment phase
//! never starts before the post batch has committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{error, info};

use subfleet_core::config::ScraperDefaults;
use subfleet_core::models::ScraperType;
use subfleet_core::retry::RetryPolicy;
use subfleet_core::storage::PgPool;
use subfleet_reddit::client::RedditClient;

use crate::config::WorkerParams;
use crate::tracker::CallTracker;
use crate::{comments, metadata, metrics, posts};

/// Pause before restarting the cycle after an unexpected failure.
const FATAL_BACKOFF: Duration = Duration::from_secs(60);

pub struct WorkerCtx {
    pub pool: PgPool,
    pub client: RedditClient,
    pub params: WorkerParams,
    pub defaults: ScraperDefaults,
    pub retry_policy: RetryPolicy,
}

async fn run_cycle(ctx: &WorkerCtx, tracker: &mut CallTracker, cycle: u64) -> Result<()> {
    let started = Instant::now();
    info!(cycle, subreddits = ?ctx.params.subreddits, "cycle started");

    let mut cycle_posts = 0i64;

    if ctx.params.scraper_type == ScraperType::Posts {
        let harvest = posts::harvest(ctx, tracker).await?;
        cycle_posts = harvest.distinct as i64;
    }

    let refresh = comments::refresh(ctx, tracker).await?;
    let cycle_comments = refresh.new_comments as i64;

    if ctx.params.scraper_type == ScraperType::Posts {
        metadata::refresh(ctx, tracker).await?;
    }

    let duration = started.elapsed().as_secs_f64();
    metrics::flush(ctx, tracker, cycle_posts, cycle_comments, duration).await?;

    info!(
        cycle,
        posts = cycle_posts,
        comments = cycle_comments,
        duration_secs = format!("{:.1}", duration),
        "cycle complete"
    );

    Ok(())
}

/// Run cycles until a stop is requested. A failed cycle logs, sleeps,
/// and restarts from the top; the supervisor remains the arbiter of
/// process-level restarts.
pub async fn run(ctx: WorkerCtx, shutdown: Arc<AtomicBool>, stop_notify: Arc<Notify>) {
    let mut tracker = CallTracker::new(
        &ctx.params.subreddits.join(","),
        ctx.params.scraper_type.as_str(),
        &ctx.params.handle,
    );

    let interval = Duration::from_secs(ctx.params.scrape_interval_secs);
    let mut cycle = 0u64;

    loop {
        cycle += 1;

        if let Err(e) = run_cycle(&ctx, &mut tracker, cycle).await {
            error!(cycle, error = %format!("{:#}", e), "cycle failed, backing off");
            if wait_or_stop(&shutdown, &stop_notify, FATAL_BACKOFF).await {
                break;
            }
            continue;
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        info!(wait_secs = interval.as_secs(), "sleeping until next cycle");
        if wait_or_stop(&shutdown, &stop_notify, interval).await {
            break;
        }
    }

    info!("worker loop stopped");
}

/// Sleep for `duration`, returning early (true) on a stop request.
async fn wait_or_stop(
    shutdown: &AtomicBool,
    stop_notify: &Notify,
    duration: Duration,
) -> bool {
    if shutdown.load(Ordering::SeqCst) {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => shutdown.load(Ordering::SeqCst),
        _ = stop_notify.notified() => true,
    }
}

//! Phase D: metrics flush.
//!
//! Updates the scraper row's embedded metrics (worker-owned) and appends
//! one api_usage record carrying both logical call counts and the
//! transport's authoritative HTTP counters, then resets the per-cycle
//! counters.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use subfleet_core::models::ScraperMetrics;
use subfleet_core::storage::{scrapers, usage};

use crate::cycle::WorkerCtx;
use crate::tracker::CallTracker;

/// Fold one cycle's counts into the running metrics document. Hourly
/// rates are computed against lifetime since the instance was created.
pub fn roll_metrics(
    prev: &ScraperMetrics,
    cycle_posts: i64,
    cycle_comments: i64,
    cycle_duration_secs: f64,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ScraperMetrics {
    let total_posts = prev.total_posts_collected + cycle_posts;
    let total_comments = prev.total_comments_collected + cycle_comments;
    let total_cycles = prev.total_cycles + 1;

    let lifetime_hours = ((now - created_at).num_seconds() as f64 / 3600.0).max(1.0 / 3600.0);

    let avg_cycle_duration = (prev.avg_cycle_duration * prev.total_cycles as f64
        + cycle_duration_secs)
        / total_cycles as f64;

    ScraperMetrics {
        total_posts_collected: total_posts,
        total_comments_collected: total_comments,
        total_cycles,
        last_cycle_posts: cycle_posts,
        last_cycle_comments: cycle_comments,
        last_cycle_time: Some(now),
        last_cycle_duration: cycle_duration_secs,
        posts_per_hour: total_posts as f64 / lifetime_hours,
        comments_per_hour: total_comments as f64 / lifetime_hours,
        avg_cycle_duration,
    }
}

pub async fn flush(
    ctx: &WorkerCtx,
    tracker: &mut CallTracker,
    cycle_posts: i64,
    cycle_comments: i64,
    cycle_duration_secs: f64,
) -> Result<()> {
    let now = Utc::now();

    match scrapers::get_instance(
        &ctx.pool,
        &ctx.params.primary,
        ctx.params.scraper_type.as_str(),
    )
    .await?
    {
        Some(instance) => {
            let rolled = roll_metrics(
                &instance.metrics(),
                cycle_posts,
                cycle_comments,
                cycle_duration_secs,
                instance.created_at,
                now,
            );
            scrapers::update_metrics(
                &ctx.pool,
                &ctx.params.primary,
                ctx.params.scraper_type.as_str(),
                &rolled,
            )
            .await?;
            info!(
                total_posts = rolled.total_posts_collected,
                total_comments = rolled.total_comments_collected,
                cycles = rolled.total_cycles,
                posts_per_hour = format!("{:.1}", rolled.posts_per_hour),
                "scraper metrics updated"
            );
        }
        None => {
            warn!(
                primary = %ctx.params.primary,
                "scraper row missing, skipping metrics update"
            );
        }
    }

    let http_cycle = ctx.client.transport().reset_cycle();
    let record = tracker.flush(http_cycle, ctx.client.transport().rate_limit_snapshot(), now);

    info!(
        logical_calls = record.total_calls,
        actual_http_requests = record.actual_http_requests,
        cost_usd = format!("{:.4}", record.estimated_cost_usd),
        accuracy_ratio = format!("{:.4}", record.accuracy_ratio),
        "api usage flushed"
    );

    usage::append(&ctx.pool, &record).await?;

    let metrics = subfleet_core::observability::metrics();
    metrics
        .cycles_total
        .with_label_values(&[ctx.params.scraper_type.as_str()])
        .inc();
    metrics
        .cycle_duration_seconds
        .with_label_values(&[ctx.params.scraper_type.as_str()])
        .observe(cycle_duration_secs);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn first_cycle_totals_match_cycle_counts() {
        let now = Utc::now();
        let created = now - Duration::hours(2);
        let rolled = roll_metrics(&ScraperMetrics::default(), 5, 12, 30.0, created, now);

        assert_eq!(rolled.total_posts_collected, 5);
        assert_eq!(rolled.total_comments_collected, 12);
        assert_eq!(rolled.total_cycles, 1);
        assert_eq!(rolled.last_cycle_posts, 5);
        assert!((rolled.posts_per_hour - 2.5).abs() < 1e-9);
        assert!((rolled.comments_per_hour - 6.0).abs() < 1e-9);
        assert!((rolled.avg_cycle_duration - 30.0).abs() < 1e-9);
    }

    #[test]
    fn averages_roll_across_cycles() {
        let now = Utc::now();
        let created = now - Duration::hours(1);
        let first = roll_metrics(&ScraperMetrics::default(), 10, 0, 20.0, created, now);
        let second = roll_metrics(&first, 4, 0, 40.0, created, now);

        assert_eq!(second.total_posts_collected, 14);
        assert_eq!(second.total_cycles, 2);
        assert_eq!(second.last_cycle_posts, 4);
        assert!((second.avg_cycle_duration - 30.0).abs() < 1e-9);
    }

    #[test]
    fn young_instance_rate_does_not_divide_by_zero() {
        let now = Utc::now();
        let rolled = roll_metrics(&ScraperMetrics::default(), 5, 0, 1.0, now, now);
        assert!(rolled.posts_per_hour.is_finite());
    }
}

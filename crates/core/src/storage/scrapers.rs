use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::models::{ScraperInstance, ScraperMetrics, ScraperStatus};
use crate::observability::DatabaseQueryTracker;

const SCRAPER_COLUMNS: &str = r#"
    subreddit, scraper_type, subreddits, account_name, posts_limit, interval_secs,
    comment_batch, sorting_methods, auto_restart, status, container_handle,
    restart_count, last_error, metrics, pending_scrape, scrape_failures,
    created_at, last_updated
"#;

// created_at, metrics, restart_count and pending_scrape are insert-only
// here: re-registering an instance refreshes its config without wiping
// the worker-owned metrics or the restart history.
const REGISTER_INSTANCE_QUERY: &str = r#"
    INSERT INTO scrapers (
        subreddit, scraper_type, subreddits, account_name, posts_limit,
        interval_secs, comment_batch, sorting_methods, auto_restart, status, metrics
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'starting', $10)
    ON CONFLICT (subreddit, scraper_type) DO UPDATE SET
        subreddits = EXCLUDED.subreddits,
        account_name = EXCLUDED.account_name,
        posts_limit = EXCLUDED.posts_limit,
        interval_secs = EXCLUDED.interval_secs,
        comment_batch = EXCLUDED.comment_batch,
        sorting_methods = EXCLUDED.sorting_methods,
        auto_restart = EXCLUDED.auto_restart,
        status = 'starting',
        last_error = NULL,
        last_updated = NOW()
"#;

const UPDATE_STATUS_QUERY: &str = r#"
    UPDATE scrapers SET
        status = $3,
        container_handle = COALESCE($4, container_handle),
        last_error = $5,
        restart_count = restart_count + $6,
        last_updated = NOW()
    WHERE subreddit = $1 AND scraper_type = $2
"#;

const UPDATE_METRICS_QUERY: &str = r#"
    UPDATE scrapers SET metrics = $3
    WHERE subreddit = $1 AND scraper_type = $2
"#;

const SET_AUTO_RESTART_QUERY: &str = r#"
    UPDATE scrapers SET auto_restart = $3, last_updated = NOW()
    WHERE subreddit = $1 AND scraper_type = $2
"#;

const DELETE_INSTANCE_QUERY: &str = r#"
    DELETE FROM scrapers WHERE subreddit = $1 AND scraper_type = $2
"#;

const APPEND_SUBREDDITS_QUERY: &str = r#"
    UPDATE scrapers SET
        subreddits = subreddits || $3,
        pending_scrape = pending_scrape || $3,
        scrape_failures = scrape_failures - $3,
        last_updated = NOW()
    WHERE subreddit = $1 AND scraper_type = $2
"#;

/// Create-or-update a scraper instance row with `status=starting`.
#[tracing::instrument(name = "database.register_scraper", skip(pool, subreddits), fields(database.system = "postgresql", subreddit = %subreddit, scraper_type = %scraper_type))]
#[allow(clippy::too_many_arguments)]
pub async fn register_instance(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
    subreddits: &[String],
    account_name: &str,
    posts_limit: i32,
    interval_secs: i64,
    comment_batch: i32,
    sorting_methods: &[String],
    auto_restart: bool,
) -> Result<()> {
    let tracker = DatabaseQueryTracker::new("UPSERT", "scrapers");
    let initial_metrics = serde_json::to_value(ScraperMetrics::default())?;

    let result = sqlx::query(REGISTER_INSTANCE_QUERY)
        .bind(subreddit)
        .bind(scraper_type)
        .bind(subreddits)
        .bind(account_name)
        .bind(posts_limit)
        .bind(interval_secs)
        .bind(comment_batch)
        .bind(sorting_methods)
        .bind(auto_restart)
        .bind(initial_metrics)
        .execute(pool)
        .await;

    tracker.finish(result.is_ok());
    result?;
    Ok(())
}

/// Supervisor-owned status transition. `handle = None` leaves the stored
/// handle untouched; `increment_restart` bumps the restart counter.
pub async fn update_status(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
    status: ScraperStatus,
    handle: Option<&str>,
    last_error: Option<&str>,
    increment_restart: bool,
) -> Result<()> {
    sqlx::query(UPDATE_STATUS_QUERY)
        .bind(subreddit)
        .bind(scraper_type)
        .bind(status.as_str())
        .bind(handle)
        .bind(last_error)
        .bind(if increment_restart { 1i32 } else { 0i32 })
        .execute(pool)
        .await?;
    Ok(())
}

/// Worker-owned metrics write; touches nothing else on the row.
pub async fn update_metrics(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
    metrics: &ScraperMetrics,
) -> Result<()> {
    sqlx::query(UPDATE_METRICS_QUERY)
        .bind(subreddit)
        .bind(scraper_type)
        .bind(serde_json::to_value(metrics)?)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_instance(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
) -> Result<Option<ScraperInstance>> {
    let query = format!(
        "SELECT {} FROM scrapers WHERE subreddit = $1 AND scraper_type = $2",
        SCRAPER_COLUMNS
    );
    let row = sqlx::query_as::<_, ScraperInstance>(&query)
        .bind(subreddit)
        .bind(scraper_type)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_instances(pool: &Pool<Postgres>) -> Result<Vec<ScraperInstance>> {
    let query = format!(
        "SELECT {} FROM scrapers ORDER BY subreddit, scraper_type",
        SCRAPER_COLUMNS
    );
    let rows = sqlx::query_as::<_, ScraperInstance>(&query)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Instances in any of the given statuses with auto_restart enabled;
/// the liveness loop's working set.
pub async fn list_by_statuses_auto_restart(
    pool: &Pool<Postgres>,
    statuses: &[String],
) -> Result<Vec<ScraperInstance>> {
    let query = format!(
        "SELECT {} FROM scrapers WHERE status = ANY($1) AND auto_restart ORDER BY subreddit",
        SCRAPER_COLUMNS
    );
    let rows = sqlx::query_as::<_, ScraperInstance>(&query)
        .bind(statuses)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// The single running instance of the given type, if any. The
/// suggestions worker drains into this target.
pub async fn find_active_target(
    pool: &Pool<Postgres>,
    scraper_type: &str,
) -> Result<Option<ScraperInstance>> {
    let query = format!(
        "SELECT {} FROM scrapers WHERE scraper_type = $1 AND status = 'running' LIMIT 1",
        SCRAPER_COLUMNS
    );
    let row = sqlx::query_as::<_, ScraperInstance>(&query)
        .bind(scraper_type)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn set_auto_restart(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
    auto_restart: bool,
) -> Result<bool> {
    let result = sqlx::query(SET_AUTO_RESTART_QUERY)
        .bind(subreddit)
        .bind(scraper_type)
        .bind(auto_restart)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_instance(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
) -> Result<bool> {
    let result = sqlx::query(DELETE_INSTANCE_QUERY)
        .bind(subreddit)
        .bind(scraper_type)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Append already-deduplicated names to the target's subreddit list and
/// priority queue, clearing any stale failure counters for them.
#[tracing::instrument(name = "database.append_subreddits", skip(pool, new_subreddits), fields(database.system = "postgresql", subreddit = %subreddit, count = new_subreddits.len()))]
pub async fn append_subreddits(
    pool: &Pool<Postgres>,
    subreddit: &str,
    scraper_type: &str,
    new_subreddits: &[String],
) -> Result<()> {
    if new_subreddits.is_empty() {
        return Ok(());
    }

    let tracker = DatabaseQueryTracker::new("UPDATE", "scrapers");
    let result = sqlx::query(APPEND_SUBREDDITS_QUERY)
        .bind(subreddit)
        .bind(scraper_type)
        .bind(new_subreddits)
        .execute(pool)
        .await;
    tracker.finish(result.is_ok());
    result?;
    Ok(())
}

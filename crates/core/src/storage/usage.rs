use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::models::ApiUsageRecord;
use crate::observability::DatabaseQueryTracker;

const APPEND_USAGE_QUERY: &str = r#"
    INSERT INTO api_usage (
        subreddit, scraper_type, container_handle, timestamp, minute_bucket, hour_bucket,
        day_bucket, calls, total_calls, avg_response_time_ms, errors,
        cycle_duration_seconds, rate_limit, actual_http_requests, estimated_cost_usd,
        accuracy_ratio
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
"#;

const PURGE_EXPIRED_QUERY: &str = r#"
    DELETE FROM api_usage WHERE timestamp < NOW() - ($1 * INTERVAL '1 day')
"#;

/// Append one usage record at the end of a worker cycle.
#[tracing::instrument(name = "database.append_api_usage", skip(pool, record), fields(database.system = "postgresql", subreddit = %record.subreddit))]
pub async fn append(pool: &Pool<Postgres>, record: &ApiUsageRecord) -> Result<()> {
    let tracker = DatabaseQueryTracker::new("INSERT", "api_usage");

    let rate_limit = record
        .rate_limit
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;

    let result = sqlx::query(APPEND_USAGE_QUERY)
        .bind(&record.subreddit)
        .bind(&record.scraper_type)
        .bind(&record.container_handle)
        .bind(record.timestamp)
        .bind(record.minute_bucket)
        .bind(record.hour_bucket)
        .bind(record.day_bucket)
        .bind(&record.calls)
        .bind(record.total_calls)
        .bind(record.avg_response_time_ms)
        .bind(record.errors)
        .bind(record.cycle_duration_seconds)
        .bind(rate_limit)
        .bind(record.actual_http_requests)
        .bind(record.estimated_cost_usd)
        .bind(record.accuracy_ratio)
        .execute(pool)
        .await;

    tracker.finish(result.is_ok());
    result?;
    Ok(())
}

/// Drop usage rows older than the retention window. Stands in for a TTL
/// index; the supervisor runs it periodically.
pub async fn purge_expired(pool: &Pool<Postgres>, retention_days: i64) -> Result<u64> {
    let result = sqlx::query(PURGE_EXPIRED_QUERY)
        .bind(retention_days as f64)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

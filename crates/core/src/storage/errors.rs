use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::observability;

const RECORD_ERROR_QUERY: &str = r#"
    INSERT INTO scrape_errors (subreddit, post_id, error_type, error_message, retry_count)
    VALUES ($1, $2, $3, $4, $5)
"#;

/// Append-only error record; never updated by the core loops.
pub async fn record_error(
    pool: &Pool<Postgres>,
    subreddit: Option<&str>,
    post_id: Option<&str>,
    error_type: &str,
    message: &str,
    retry_count: i32,
) -> Result<()> {
    sqlx::query(RECORD_ERROR_QUERY)
        .bind(subreddit)
        .bind(post_id)
        .bind(error_type)
        .bind(message)
        .bind(retry_count)
        .execute(pool)
        .await?;

    observability::record_scrape_error(error_type);
    Ok(())
}

/// Unresolved error count, surfaced by health reporting.
pub async fn unresolved_count(pool: &Pool<Postgres>) -> Result<i64> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scrape_errors WHERE NOT resolved")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

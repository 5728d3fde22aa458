use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::models::SuggestionBatch;

const PENDING_SUGGESTIONS_QUERY: &str = r#"
    SELECT id, subreddits, created_at, synced_at, synced_to_scraper
    FROM subreddit_suggestions
    WHERE synced_at IS NULL
    ORDER BY created_at ASC
"#;

const MARK_SYNCED_QUERY: &str = r#"
    UPDATE subreddit_suggestions SET
        synced_at = NOW(),
        synced_to_scraper = $2
    WHERE id = ANY($1)
"#;

/// Suggestion batches not yet drained into a scraper queue.
pub async fn pending(pool: &Pool<Postgres>) -> Result<Vec<SuggestionBatch>> {
    let rows = sqlx::query_as::<_, SuggestionBatch>(PENDING_SUGGESTIONS_QUERY)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Stamp a set of batches as synced to the named target scraper.
pub async fn mark_synced(
    pool: &Pool<Postgres>,
    ids: &[i64],
    synced_to_scraper: &str,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(MARK_SYNCED_QUERY)
        .bind(ids)
        .bind(synced_to_scraper)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

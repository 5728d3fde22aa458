use std::collections::HashSet;

use anyhow::Result;
use sqlx::{Pool, Postgres};

use super::posts::UpsertCounts;
use crate::models::CommentDocument;
use crate::observability::DatabaseQueryTracker;

const UPSERT_COMMENTS_QUERY: &str = r#"
    INSERT INTO comments (
        comment_id, post_id, parent_id, parent_type, author, body, score,
        created_utc, created_datetime, depth, is_submitter, distinguished,
        stickied, edited, controversiality, gilded, total_awards_received,
        subreddit, scraped_at
    )
    SELECT
        x.comment_id, x.post_id, x.parent_id, x.parent_type, x.author, x.body, x.score,
        x.created_utc, x.created_datetime, x.depth, x.is_submitter, x.distinguished,
        x.stickied, x.edited, x.controversiality, x.gilded, x.total_awards_received,
        x.subreddit, x.scraped_at
    FROM jsonb_to_recordset($1) AS x(
        comment_id TEXT, post_id TEXT, parent_id TEXT, parent_type TEXT,
        author TEXT, body TEXT, score BIGINT, created_utc DOUBLE PRECISION,
        created_datetime TIMESTAMPTZ, depth INTEGER, is_submitter BOOLEAN,
        distinguished TEXT, stickied BOOLEAN, edited BOOLEAN,
        controversiality BIGINT, gilded BIGINT, total_awards_received BIGINT,
        subreddit TEXT, scraped_at TIMESTAMPTZ
    )
    ON CONFLICT (comment_id) DO UPDATE SET
        body = EXCLUDED.body,
        score = EXCLUDED.score,
        edited = EXCLUDED.edited,
        controversiality = EXCLUDED.controversiality,
        gilded = EXCLUDED.gilded,
        total_awards_received = EXCLUDED.total_awards_received,
        scraped_at = EXCLUDED.scraped_at
    RETURNING (xmax = 0) AS inserted
"#;

const EXISTING_COMMENT_IDS_QUERY: &str = r#"
    SELECT comment_id FROM comments WHERE post_id = $1
"#;

const COUNT_COMMENTS_FOR_POST_QUERY: &str = r#"
    SELECT COUNT(*) FROM comments WHERE post_id = $1
"#;

/// Bulk upsert keyed on `comment_id`.
#[tracing::instrument(name = "database.upsert_comments", skip(pool, batch), fields(database.system = "postgresql", batch_size = batch.len()))]
pub async fn upsert_comments(
    pool: &Pool<Postgres>,
    batch: &[CommentDocument],
) -> Result<UpsertCounts> {
    if batch.is_empty() {
        return Ok(UpsertCounts::default());
    }

    let tracker = DatabaseQueryTracker::new("UPSERT", "comments");
    let payload = serde_json::to_value(batch)?;

    let result = sqlx::query_scalar::<_, bool>(UPSERT_COMMENTS_QUERY)
        .bind(payload)
        .fetch_all(pool)
        .await;

    tracker.finish(result.is_ok());

    let rows = result?;
    let inserted = rows.iter().filter(|&&i| i).count() as u64;
    Ok(UpsertCounts {
        inserted,
        modified: rows.len() as u64 - inserted,
    })
}

/// IDs of comments already stored for a post. The tree walk skips these
/// but still descends into their replies.
#[tracing::instrument(name = "database.existing_comment_ids", skip(pool), fields(database.system = "postgresql"))]
pub async fn existing_comment_ids(
    pool: &Pool<Postgres>,
    post_id: &str,
) -> Result<HashSet<String>> {
    let tracker = DatabaseQueryTracker::new("SELECT", "comments");
    let result = sqlx::query_scalar::<_, String>(EXISTING_COMMENT_IDS_QUERY)
        .bind(post_id)
        .fetch_all(pool)
        .await;
    tracker.finish(result.is_ok());
    Ok(result?.into_iter().collect())
}

/// Stored comment count for a post; the verification step in the comment
/// phase compares this against the in-memory scrape.
pub async fn count_comments_for_post(pool: &Pool<Postgres>, post_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(COUNT_COMMENTS_FOR_POST_QUERY)
        .bind(post_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

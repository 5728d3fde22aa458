use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::models::PostDocument;
use crate::observability::DatabaseQueryTracker;

/// Result of a bulk post upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub modified: u64,
}

/// A Phase B candidate as returned by the tiered refresh query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommentRefreshCandidate {
    pub post_id: String,
    pub subreddit: String,
    pub title: String,
    pub num_comments: i64,
    pub initial_comments_scraped: bool,
}

// Scalar fields follow the latest observation; the four comment-tracking
// columns are deliberately absent from the conflict update so the values
// written by the comment phase survive every post re-harvest.
const UPSERT_POSTS_QUERY: &str = r#"
    INSERT INTO posts (
        post_id, subreddit, title, author, url, reddit_url, score, num_comments,
        created_utc, created_datetime, scraped_at, selftext, is_self, upvote_ratio,
        distinguished, stickied, over_18, spoiler, locked, sort_method,
        comments_scraped, initial_comments_scraped, last_comment_fetch_time, comments_scraped_at
    )
    SELECT
        x.post_id, x.subreddit, x.title, x.author, x.url, x.reddit_url, x.score, x.num_comments,
        x.created_utc, x.created_datetime, x.scraped_at, x.selftext, x.is_self, x.upvote_ratio,
        x.distinguished, x.stickied, x.over_18, x.spoiler, x.locked, x.sort_method,
        x.comments_scraped, x.initial_comments_scraped, x.last_comment_fetch_time, x.comments_scraped_at
    FROM jsonb_to_recordset($1) AS x(
        post_id TEXT, subreddit TEXT, title TEXT, author TEXT, url TEXT, reddit_url TEXT,
        score BIGINT, num_comments BIGINT, created_utc DOUBLE PRECISION,
        created_datetime TIMESTAMPTZ, scraped_at TIMESTAMPTZ, selftext TEXT,
        is_self BOOLEAN, upvote_ratio DOUBLE PRECISION, distinguished TEXT,
        stickied BOOLEAN, over_18 BOOLEAN, spoiler BOOLEAN, locked BOOLEAN,
        sort_method TEXT, comments_scraped BOOLEAN, initial_comments_scraped BOOLEAN,
        last_comment_fetch_time TIMESTAMPTZ, comments_scraped_at TIMESTAMPTZ
    )
    ON CONFLICT (post_id) DO UPDATE SET
        subreddit = EXCLUDED.subreddit,
        title = EXCLUDED.title,
        author = EXCLUDED.author,
        url = EXCLUDED.url,
        reddit_url = EXCLUDED.reddit_url,
        score = EXCLUDED.score,
        num_comments = EXCLUDED.num_comments,
        created_utc = EXCLUDED.created_utc,
        created_datetime = EXCLUDED.created_datetime,
        scraped_at = EXCLUDED.scraped_at,
        selftext = EXCLUDED.selftext,
        is_self = EXCLUDED.is_self,
        upvote_ratio = EXCLUDED.upvote_ratio,
        distinguished = EXCLUDED.distinguished,
        stickied = EXCLUDED.stickied,
        over_18 = EXCLUDED.over_18,
        spoiler = EXCLUDED.spoiler,
        locked = EXCLUDED.locked,
        sort_method = EXCLUDED.sort_method
    RETURNING (xmax = 0) AS inserted
"#;

const COMMENT_REFRESH_CANDIDATES_QUERY: &str = r#"
    WITH ranked AS (
        SELECT post_id, subreddit, title, num_comments, initial_comments_scraped, created_utc,
            CASE
                WHEN initial_comments_scraped IS NOT TRUE THEN 0
                WHEN num_comments > 100 AND (last_comment_fetch_time IS NULL
                    OR last_comment_fetch_time <= NOW() - INTERVAL '2 hours') THEN 1
                WHEN num_comments > 20 AND num_comments <= 100 AND (last_comment_fetch_time IS NULL
                    OR last_comment_fetch_time <= NOW() - INTERVAL '6 hours') THEN 2
                WHEN num_comments <= 20 AND (last_comment_fetch_time IS NULL
                    OR last_comment_fetch_time <= NOW() - INTERVAL '24 hours') THEN 3
            END AS tier
        FROM posts
        WHERE subreddit = ANY($1)
    )
    SELECT post_id, subreddit, title, num_comments, initial_comments_scraped
    FROM ranked
    WHERE tier IS NOT NULL
    ORDER BY tier ASC, num_comments DESC, created_utc DESC
    LIMIT $2
"#;

const MARK_COMMENT_STATE_QUERY: &str = r#"
    UPDATE posts SET
        comments_scraped = TRUE,
        last_comment_fetch_time = NOW()
    WHERE post_id = ANY($1)
"#;

const MARK_INITIAL_COMMENT_STATE_QUERY: &str = r#"
    UPDATE posts SET
        comments_scraped = TRUE,
        last_comment_fetch_time = NOW(),
        initial_comments_scraped = TRUE,
        comments_scraped_at = NOW()
    WHERE post_id = ANY($1)
"#;

const COUNT_POSTS_FOR_SUBREDDIT_QUERY: &str = r#"
    SELECT COUNT(*) FROM posts WHERE subreddit = $1
"#;

const POST_COMMENT_STATE_QUERY: &str = r#"
    SELECT post_id, subreddit, title, num_comments, initial_comments_scraped
    FROM posts WHERE post_id = $1
"#;

/// Bulk upsert keyed on `post_id`. Comment-tracking fields on existing
/// rows are preserved; see the query comment. Returns insert/update
/// counts, matching the unordered-bulk-write contract.
#[tracing::instrument(name = "database.upsert_posts", skip(pool, batch), fields(database.system = "postgresql", batch_size = batch.len()))]
pub async fn upsert_posts(pool: &Pool<Postgres>, batch: &[PostDocument]) -> Result<UpsertCounts> {
    if batch.is_empty() {
        return Ok(UpsertCounts::default());
    }

    let tracker = DatabaseQueryTracker::new("UPSERT", "posts");
    let payload = serde_json::to_value(batch)?;

    let result = sqlx::query_scalar::<_, bool>(UPSERT_POSTS_QUERY)
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

/// Select up to `limit` posts due for a comment refresh, tiered per the
/// freshness policy: never-scraped first, then high-activity posts stale
/// past 2h, medium past 6h, low past 24h. Within a tier the busiest and
/// newest posts go first.
#[tracing::instrument(name = "database.comment_refresh_candidates", skip(pool), fields(database.system = "postgresql"))]
pub async fn comment_refresh_candidates(
    pool: &Pool<Postgres>,
    subreddits: &[String],
    limit: i64,
) -> Result<Vec<CommentRefreshCandidate>> {
    let tracker = DatabaseQueryTracker::new("SELECT", "posts");
    let result = sqlx::query_as::<_, CommentRefreshCandidate>(COMMENT_REFRESH_CANDIDATES_QUERY)
        .bind(subreddits)
        .bind(limit)
        .fetch_all(pool)
        .await;
    tracker.finish(result.is_ok());
    Ok(result?)
}

/// Stamp comment-tracking state on a set of posts after a verified
/// comment pass. With `initial` the first-scrape flags are set as well;
/// `initial_comments_scraped` never transitions back to false.
#[tracing::instrument(name = "database.mark_posts_comment_state", skip(pool, post_ids), fields(database.system = "postgresql", count = post_ids.len(), initial = initial))]
pub async fn mark_posts_comment_state(
    pool: &Pool<Postgres>,
    post_ids: &[String],
    initial: bool,
) -> Result<u64> {
    if post_ids.is_empty() {
        return Ok(0);
    }

    let query = if initial {
        MARK_INITIAL_COMMENT_STATE_QUERY
    } else {
        MARK_COMMENT_STATE_QUERY
    };

    let tracker = DatabaseQueryTracker::new("UPDATE", "posts");
    let result = sqlx::query(query).bind(post_ids).execute(pool).await;
    tracker.finish(result.is_ok());
    Ok(result?.rows_affected())
}

/// Post count for one subreddit; zero triggers the first-run bootstrap.
pub async fn count_posts_for_subreddit(pool: &Pool<Postgres>, subreddit: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(COUNT_POSTS_FOR_SUBREDDIT_QUERY)
        .bind(subreddit)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Read back one post's comment-tracking view.
pub async fn post_comment_state(
    pool: &Pool<Postgres>,
    post_id: &str,
) -> Result<Option<CommentRefreshCandidate>> {
    let row = sqlx::query_as::<_, CommentRefreshCandidate>(POST_COMMENT_STATE_QUERY)
        .bind(post_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

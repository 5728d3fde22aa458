use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::debug;

use crate::models::{EnrichmentCandidate, SubredditMetadataDoc};
use crate::observability::DatabaseQueryTracker;
use crate::providers::Embedding;

/// The fields whose change retriggers enrichment. Everything else on the
/// metadata row can churn without invalidating stored embeddings.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EmbeddingRelevantFields {
    pub title: String,
    pub public_description: String,
    pub description: String,
    pub guidelines_text: String,
    pub rules_text: String,
    pub sample_posts_titles: String,
    pub advertiser_category: Option<String>,
}

impl EmbeddingRelevantFields {
    pub fn of(doc: &SubredditMetadataDoc) -> Self {
        Self {
            title: doc.title.clone(),
            public_description: doc.public_description.clone(),
            description: doc.description.clone(),
            guidelines_text: doc.guidelines_text.clone(),
            rules_text: doc.rules_text.clone(),
            sample_posts_titles: doc.sample_posts_titles.clone(),
            advertiser_category: doc.advertiser_category.clone(),
        }
    }
}

/// `pending` is stamped only when the embedding-relevant fields actually
/// changed; repeated identical upserts leave `embedding_status` alone.
pub fn needs_embedding(
    existing: Option<&EmbeddingRelevantFields>,
    incoming: &EmbeddingRelevantFields,
) -> bool {
    match existing {
        None => true,
        Some(existing) => existing != incoming,
    }
}

const SELECT_EMBEDDING_FIELDS_QUERY: &str = r#"
    SELECT title, public_description, description, guidelines_text, rules_text,
           sample_posts_titles, advertiser_category
    FROM subreddit_metadata WHERE subreddit_name = $1
"#;

const UPSERT_METADATA_QUERY: &str = r#"
    INSERT INTO subreddit_metadata (
        subreddit_name, display_name, title, public_description, description, url,
        subscribers, active_user_count, over_18, lang, created_utc, created_datetime,
        submission_type, advertiser_category, quarantine, icon_img, community_icon,
        rules, rules_text, guidelines_text, sample_posts, sample_posts_titles,
        scraped_at, last_updated
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
            $17, $18, $19, $20, $21, $22, NOW(), NOW())
    ON CONFLICT (subreddit_name) DO UPDATE SET
        display_name = EXCLUDED.display_name,
        title = EXCLUDED.title,
        public_description = EXCLUDED.public_description,
        description = EXCLUDED.description,
        url = EXCLUDED.url,
        subscribers = EXCLUDED.subscribers,
        active_user_count = EXCLUDED.active_user_count,
        over_18 = EXCLUDED.over_18,
        lang = EXCLUDED.lang,
        created_utc = EXCLUDED.created_utc,
        created_datetime = EXCLUDED.created_datetime,
        submission_type = EXCLUDED.submission_type,
        advertiser_category = EXCLUDED.advertiser_category,
        quarantine = EXCLUDED.quarantine,
        icon_img = EXCLUDED.icon_img,
        community_icon = EXCLUDED.community_icon,
        rules = EXCLUDED.rules,
        rules_text = EXCLUDED.rules_text,
        guidelines_text = EXCLUDED.guidelines_text,
        sample_posts = EXCLUDED.sample_posts,
        sample_posts_titles = EXCLUDED.sample_posts_titles,
        scraped_at = NOW(),
        last_updated = NOW()
"#;

const MARK_PENDING_QUERY: &str = r#"
    UPDATE subreddit_metadata SET
        embedding_status = 'pending',
        embedding_requested_at = NOW()
    WHERE subreddit_name = $1
"#;

const METADATA_LAST_UPDATED_QUERY: &str = r#"
    SELECT last_updated FROM subreddit_metadata WHERE subreddit_name = $1
"#;

const PENDING_ENRICHMENT_QUERY: &str = r#"
    SELECT subreddit_name, title, public_description, description, guidelines_text,
           rules_text, sample_posts, sample_posts_titles, advertiser_category,
           embedding_status, embedding_retry_count,
           (combined_embedding IS NOT NULL) AS has_combined_embedding,
           (persona_embedding IS NOT NULL) AS has_persona_embedding,
           llm_enrichment
    FROM subreddit_metadata
    WHERE embedding_status = 'pending'
       OR (embedding_status = 'failed' AND embedding_retry_count < $1)
    ORDER BY embedding_requested_at ASC NULLS LAST
    LIMIT $2
"#;

const PENDING_ENRICHMENT_COUNT_QUERY: &str = r#"
    SELECT COUNT(*) FROM subreddit_metadata
    WHERE embedding_status = 'pending'
       OR (embedding_status = 'failed' AND embedding_retry_count < $1)
"#;

const STORE_COMBINED_EMBEDDING_QUERY: &str = r#"
    UPDATE subreddit_metadata SET
        combined_embedding = $2,
        embedding_model = $3,
        embedding_dimensions = $4,
        embeddings_generated_at = NOW()
    WHERE subreddit_name = $1
"#;

const STORE_PERSONA_EMBEDDING_QUERY: &str = r#"
    UPDATE subreddit_metadata SET
        persona_embedding = $2,
        persona_generated_at = NOW()
    WHERE subreddit_name = $1
"#;

const STORE_LLM_ENRICHMENT_QUERY: &str = r#"
    UPDATE subreddit_metadata SET
        llm_enrichment = $2,
        llm_enrichment_at = NOW()
    WHERE subreddit_name = $1
"#;

const MARK_ENRICHMENT_COMPLETE_QUERY: &str = r#"
    UPDATE subreddit_metadata SET
        embedding_status = 'complete',
        embedding_completed_at = NOW(),
        embedding_error = NULL,
        embedding_retry_count = 0
    WHERE subreddit_name = $1
"#;

const MARK_ENRICHMENT_FAILED_QUERY: &str = r#"
    UPDATE subreddit_metadata SET
        embedding_status = 'failed',
        embedding_error = $2,
        embedding_retry_count = embedding_retry_count + 1
    WHERE subreddit_name = $1
"#;

/// Upsert the community metadata document. Returns whether the write
/// left the row marked `pending` for the enrichment worker.
#[tracing::instrument(name = "database.upsert_subreddit_metadata", skip(pool, doc), fields(database.system = "postgresql", subreddit = %doc.subreddit_name))]
pub async fn upsert_metadata(pool: &Pool<Postgres>, doc: &SubredditMetadataDoc) -> Result<bool> {
    let tracker = DatabaseQueryTracker::new("UPSERT", "subreddit_metadata");

    let result: Result<bool> = async {
        let mut tx = pool.begin().await?;

        let existing = sqlx::query_as::<_, EmbeddingRelevantFields>(SELECT_EMBEDDING_FIELDS_QUERY)
            .bind(&doc.subreddit_name)
            .fetch_optional(&mut *tx)
            .await?;

        let incoming = EmbeddingRelevantFields::of(doc);
        let stamp_pending = needs_embedding(existing.as_ref(), &incoming);

        sqlx::query(UPSERT_METADATA_QUERY)
            .bind(&doc.subreddit_name)
            .bind(&doc.display_name)
            .bind(&doc.title)
            .bind(&doc.public_description)
            .bind(&doc.description)
            .bind(&doc.url)
            .bind(doc.subscribers)
            .bind(doc.active_user_count)
            .bind(doc.over_18)
            .bind(&doc.lang)
            .bind(doc.created_utc)
            .bind(doc.created_datetime)
            .bind(&doc.submission_type)
            .bind(&doc.advertiser_category)
            .bind(doc.quarantine)
            .bind(&doc.icon_img)
            .bind(&doc.community_icon)
            .bind(serde_json::to_value(&doc.rules)?)
            .bind(&doc.rules_text)
            .bind(&doc.guidelines_text)
            .bind(serde_json::to_value(&doc.sample_posts)?)
            .bind(&doc.sample_posts_titles)
            .execute(&mut *tx)
            .await?;

        if stamp_pending {
            sqlx::query(MARK_PENDING_QUERY)
                .bind(&doc.subreddit_name)
                .execute(&mut *tx)
                .await?;
            debug!(subreddit = %doc.subreddit_name, "embedding-relevant fields changed, marked pending");
        }

        tx.commit().await?;
        Ok(stamp_pending)
    }
    .await;

    tracker.finish(result.is_ok());
    result
}

/// `last_updated` for the metadata refresh gate; `None` means no
/// metadata exists yet and the phase must fire.
pub async fn metadata_last_updated(
    pool: &Pool<Postgres>,
    subreddit: &str,
) -> Result<Option<DateTime<Utc>>> {
    let ts = sqlx::query_scalar::<_, DateTime<Utc>>(METADATA_LAST_UPDATED_QUERY)
        .bind(subreddit)
        .fetch_optional(pool)
        .await?;
    Ok(ts)
}

/// Batch of documents awaiting enrichment: `pending`, or `failed` with
/// retries left. Oldest request first.
#[tracing::instrument(name = "database.pending_enrichment", skip(pool), fields(database.system = "postgresql"))]
pub async fn pending_enrichment(
    pool: &Pool<Postgres>,
    max_retries: i32,
    limit: i64,
) -> Result<Vec<EnrichmentCandidate>> {
    let tracker = DatabaseQueryTracker::new("SELECT", "subreddit_metadata");
    let result = sqlx::query_as::<_, EnrichmentCandidate>(PENDING_ENRICHMENT_QUERY)
        .bind(max_retries)
        .bind(limit)
        .fetch_all(pool)
        .await;
    tracker.finish(result.is_ok());
    Ok(result?)
}

pub async fn pending_enrichment_count(pool: &Pool<Postgres>, max_retries: i32) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(PENDING_ENRICHMENT_COUNT_QUERY)
        .bind(max_retries)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn store_combined_embedding(
    pool: &Pool<Postgres>,
    subreddit: &str,
    embedding: &Embedding,
) -> Result<()> {
    sqlx::query(STORE_COMBINED_EMBEDDING_QUERY)
        .bind(subreddit)
        .bind(&embedding.vector)
        .bind(&embedding.model)
        .bind(embedding.dimensions as i32)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn store_persona_embedding(
    pool: &Pool<Postgres>,
    subreddit: &str,
    embedding: &Embedding,
) -> Result<()> {
    sqlx::query(STORE_PERSONA_EMBEDDING_QUERY)
        .bind(subreddit)
        .bind(&embedding.vector)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn store_llm_enrichment(
    pool: &Pool<Postgres>,
    subreddit: &str,
    enrichment: &serde_json::Value,
) -> Result<()> {
    sqlx::query(STORE_LLM_ENRICHMENT_QUERY)
        .bind(subreddit)
        .bind(enrichment)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_enrichment_complete(pool: &Pool<Postgres>, subreddit: &str) -> Result<()> {
    sqlx::query(MARK_ENRICHMENT_COMPLETE_QUERY)
        .bind(subreddit)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_enrichment_failed(
    pool: &Pool<Postgres>,
    subreddit: &str,
    error: &str,
) -> Result<()> {
    sqlx::query(MARK_ENRICHMENT_FAILED_QUERY)
        .bind(subreddit)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str, category: Option<&str>) -> EmbeddingRelevantFields {
        EmbeddingRelevantFields {
            title: title.to_string(),
            public_description: "desc".to_string(),
            description: "long desc".to_string(),
            guidelines_text: "guidelines".to_string(),
            rules_text: "rules".to_string(),
            sample_posts_titles: "a | b".to_string(),
            advertiser_category: category.map(|s| s.to_string()),
        }
    }

    #[test]
    fn first_observation_always_needs_embedding() {
        assert!(needs_embedding(None, &fields("t", None)));
    }

    #[test]
    fn identical_fields_do_not_retrigger() {
        let existing = fields("t", Some("Technology"));
        let incoming = fields("t", Some("Technology"));
        assert!(!needs_embedding(Some(&existing), &incoming));
    }

    #[test]
    fn any_relevant_change_retriggers() {
        let existing = fields("t", Some("Technology"));
        assert!(needs_embedding(Some(&existing), &fields("other", Some("Technology"))));
        assert!(needs_embedding(Some(&existing), &fields("t", None)));

        let mut rules_changed = fields("t", Some("Technology"));
        rules_changed.rules_text = "new rules".to_string();
        assert!(needs_embedding(Some(&existing), &rules_changed));
    }
}

//! Enrichment worker.
//!
//! Fills in the topic embedding, the LLM audience profile, and the
//! persona embedding for every community row marked pending. The topic
//! embedding is required for `complete`; the profile and persona steps
//! are best-effort and leave gaps rather than fail the document.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use subfleet_core::config::EmbeddingWorkerConfig;
use subfleet_core::models::{EnrichmentCandidate, LlmEnrichment};
use subfleet_core::observability::record_enrichment_step;
use subfleet_core::providers::Providers;
use subfleet_core::storage::{subreddits, PgPool};

const INTER_DOC_DELAY: Duration = Duration::from_millis(500);

const PROFILE_SYSTEM_PROMPT: &str = "You are an expert at analyzing online communities. \
Extract structured audience information from subreddit data. Always respond with valid JSON.";

const LIST_ITEM_CAP: usize = 6;

#[derive(Debug, Default, Clone)]
pub struct EnrichmentStats {
    pub processed: u64,
    pub enriched: u64,
    pub persona_generated: u64,
    pub failed: u64,
    pub last_run: Option<DateTime<Utc>>,
}

pub struct EnrichmentWorker {
    pool: PgPool,
    providers: Providers,
    config: EmbeddingWorkerConfig,
    stats: Mutex<EnrichmentStats>,
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn flatten(s: &str) -> String {
    s.replace('\n', " ").trim().to_string()
}

/// Deterministic topic text: labelled sections over the community's
/// observable fields, or a bare name fallback when everything is empty.
pub fn compose_topic_text(c: &EnrichmentCandidate) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(title) = c.title.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Title: {}", title));
    }
    if let Some(desc) = c.public_description.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Description: {}", desc));
    }
    if let Some(about) = c.description.as_deref() {
        let about = flatten(&truncate_chars(about, 500));
        if !about.is_empty() {
            parts.push(format!("About: {}", about));
        }
    }
    if let Some(guidelines) = c.guidelines_text.as_deref() {
        let guidelines = flatten(&truncate_chars(guidelines, 500));
        if !guidelines.is_empty() {
            parts.push(format!("Guidelines: {}", guidelines));
        }
    }
    if let Some(rules) = c.rules_text.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Rules: {}", rules));
    }
    if let Some(titles) = c.sample_posts_titles.as_deref() {
        let titles = truncate_chars(titles, 1000);
        if !titles.is_empty() {
            parts.push(format!("Topics: {}", titles));
        }
    }
    if let Some(category) = c.advertiser_category.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Category: {}", category));
    }

    let combined = parts.join("\n");
    if combined.trim().is_empty() {
        format!("Subreddit: {}", c.subreddit_name)
    } else {
        combined
    }
}

/// Persona-weighted text: audience signals first, topic context after.
pub fn compose_persona_text(c: &EnrichmentCandidate, enrichment: &LlmEnrichment) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !enrichment.audience_profile.is_empty() {
        parts.push(format!("Audience: {}", enrichment.audience_profile));
    }
    let capped_join = |items: &[String]| -> String {
        items
            .iter()
            .take(LIST_ITEM_CAP)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    if !enrichment.audience_types.is_empty() {
        parts.push(format!("User types: {}", capped_join(&enrichment.audience_types)));
    }
    if !enrichment.user_intents.is_empty() {
        parts.push(format!(
            "They come here to: {}",
            capped_join(&enrichment.user_intents)
        ));
    }
    if !enrichment.pain_points.is_empty() {
        parts.push(format!("Pain points: {}", capped_join(&enrichment.pain_points)));
    }
    if !enrichment.content_themes.is_empty() {
        parts.push(format!(
            "Content themes: {}",
            capped_join(&enrichment.content_themes)
        ));
    }

    if let Some(title) = c.title.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Subreddit: {}", title));
    }
    if let Some(desc) = c.public_description.as_deref() {
        let desc = flatten(&truncate_chars(desc, 300));
        if !desc.is_empty() {
            parts.push(format!("About: {}", desc));
        }
    }
    if let Some(titles) = c.sample_posts_titles.as_deref() {
        let titles = truncate_chars(titles, 500);
        if !titles.is_empty() {
            parts.push(format!("Topics: {}", titles));
        }
    }
    if let Some(category) = c.advertiser_category.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Category: {}", category));
    }

    let combined = parts.join("\n");
    if combined.trim().is_empty() {
        format!("Subreddit: {}", c.subreddit_name)
    } else {
        combined
    }
}

/// User prompt for the audience-profile completion.
pub fn build_profile_prompt(c: &EnrichmentCandidate) -> String {
    let sample_titles = truncate_chars(c.sample_posts_titles.as_deref().unwrap_or(""), 600);
    let rules = truncate_chars(c.rules_text.as_deref().unwrap_or(""), 400);

    let excerpts: Vec<String> = c
        .sample_posts
        .as_array()
        .map(|posts| {
            posts
                .iter()
                .take(5)
                .filter_map(|p| p.get("selftext_excerpt").and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(|s| truncate_chars(s, 100))
                .collect()
        })
        .unwrap_or_default();

    format!(
        "Analyze this subreddit and extract audience information.\n\n\
Subreddit: r/{name}\n\
Title: {title}\n\
Description: {description}\n\
Sample post titles: {sample_titles}\n\
Sample post content: {excerpts}\n\
Rules: {rules}\n\n\
Based on this information, identify:\n\
1. Who uses this subreddit (the target audience)\n\
2. What types of users frequent it\n\
3. What they come here to do\n\
4. What problems/pain points they discuss\n\
5. Common content themes\n\n\
Return a JSON object with these fields:\n\
{{\n\
  \"audience_profile\": \"A single sentence describing who uses this subreddit and why\",\n\
  \"audience_types\": [\"list\", \"of\", \"user\", \"types\"],\n\
  \"user_intents\": [\"what\", \"users\", \"come\", \"here\", \"to\", \"do\"],\n\
  \"pain_points\": [\"problems\", \"users\", \"discuss\"],\n\
  \"content_themes\": [\"common\", \"discussion\", \"themes\"]\n\
}}\n\n\
Keep each list to 3-6 items. Be specific and actionable.",
        name = c.subreddit_name,
        title = c.title.as_deref().unwrap_or(""),
        description = c.public_description.as_deref().unwrap_or(""),
        sample_titles = sample_titles,
        excerpts = excerpts.join(" | "),
        rules = rules,
    )
}

/// Parse and normalise the model's JSON into the stored shape.
pub fn normalize_enrichment(raw: Value, model: &str, now: DateTime<Utc>) -> Result<LlmEnrichment> {
    let mut enrichment: LlmEnrichment =
        serde_json::from_value(raw).context("enrichment JSON did not match expected schema")?;

    enrichment.audience_types.truncate(LIST_ITEM_CAP);
    enrichment.user_intents.truncate(LIST_ITEM_CAP);
    enrichment.pain_points.truncate(LIST_ITEM_CAP);
    enrichment.content_themes.truncate(LIST_ITEM_CAP);
    enrichment.generated_at = Some(now);
    enrichment.model = Some(model.to_string());

    Ok(enrichment)
}

impl EnrichmentWorker {
    pub fn new(pool: PgPool, providers: Providers, config: EmbeddingWorkerConfig) -> Self {
        Self {
            pool,
            providers,
            config,
            stats: Mutex::new(EnrichmentStats::default()),
        }
    }

    pub async fn stats(&self) -> EnrichmentStats {
        self.stats.lock().await.clone()
    }

    pub fn enabled(&self) -> bool {
        self.providers.enabled()
    }

    /// Process one pending batch; returns how many documents were taken.
    pub async fn process_batch(&self) -> Result<usize> {
        let pending = subreddits::pending_enrichment(
            &self.pool,
            self.config.max_retries,
            self.config.batch_size,
        )
        .await?;

        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), "processing pending enrichment");

        for (i, candidate) in pending.iter().enumerate() {
            self.process_one(candidate).await;
            if i + 1 < pending.len() {
                tokio::time::sleep(INTER_DOC_DELAY).await;
            }
        }

        self.stats.lock().await.last_run = Some(Utc::now());
        Ok(pending.len())
    }

    async fn process_one(&self, candidate: &EnrichmentCandidate) {
        let name = &candidate.subreddit_name;
        let Some(embedder) = self.providers.embedder.as_ref() else {
            return;
        };

        // Step 1: topic embedding, required for `complete`.
        if !candidate.has_combined_embedding {
            let text = compose_topic_text(candidate);
            match embedder.embed(&text).await {
                Ok(embedding) => {
                    record_enrichment_step("combined_embedding", true);
                    if let Err(e) =
                        subreddits::store_combined_embedding(&self.pool, name, &embedding).await
                    {
                        error!(subreddit = %name, error = %e, "failed to store topic embedding");
                        self.fail(name, &format!("store combined embedding: {}", e)).await;
                        return;
                    }
                    self.stats.lock().await.processed += 1;
                }
                Err(e) => {
                    record_enrichment_step("combined_embedding", false);
                    warn!(subreddit = %name, error = %format!("{:#}", e), "topic embedding failed");
                    self.fail(name, &format!("{:#}", e)).await;
                    return;
                }
            }
        }

        // Step 2: LLM audience profile, best-effort.
        let mut enrichment: Option<LlmEnrichment> = candidate
            .llm_enrichment
            .clone()
            .and_then(|v| serde_json::from_value(v).ok());

        if enrichment.is_none() {
            if let Some(chat) = self.providers.chat.as_ref() {
                let prompt = build_profile_prompt(candidate);
                match chat.complete_json(PROFILE_SYSTEM_PROMPT, &prompt).await {
                    Ok(raw) => match normalize_enrichment(raw, chat.model_name(), Utc::now()) {
                        Ok(profile) => {
                            record_enrichment_step("llm_enrichment", true);
                            match serde_json::to_value(&profile) {
                                Ok(value) => {
                                    if let Err(e) = subreddits::store_llm_enrichment(
                                        &self.pool, name, &value,
                                    )
                                    .await
                                    {
                                        warn!(subreddit = %name, error = %e, "failed to store enrichment");
                                    } else {
                                        enrichment = Some(profile);
                                        self.stats.lock().await.enriched += 1;
                                    }
                                }
                                Err(e) => {
                                    warn!(subreddit = %name, error = %e, "enrichment serialization failed")
                                }
                            }
                        }
                        Err(e) => {
                            record_enrichment_step("llm_enrichment", false);
                            warn!(subreddit = %name, error = %format!("{:#}", e), "audience profile rejected");
                        }
                    },
                    Err(e) => {
                        record_enrichment_step("llm_enrichment", false);
                        warn!(subreddit = %name, error = %format!("{:#}", e), "audience profile failed");
                    }
                }
            }
        }

        // Step 3: persona embedding, best-effort; needs the profile.
        if !candidate.has_persona_embedding {
            if let Some(profile) = enrichment.as_ref() {
                let text = compose_persona_text(candidate, profile);
                match embedder.embed(&text).await {
                    Ok(embedding) => {
                        record_enrichment_step("persona_embedding", true);
                        if let Err(e) =
                            subreddits::store_persona_embedding(&self.pool, name, &embedding).await
                        {
                            warn!(subreddit = %name, error = %e, "failed to store persona embedding");
                        } else {
                            self.stats.lock().await.persona_generated += 1;
                        }
                    }
                    Err(e) => {
                        record_enrichment_step("persona_embedding", false);
                        warn!(subreddit = %name, error = %format!("{:#}", e), "persona embedding failed");
                    }
                }
            }
        }

        if let Err(e) = subreddits::mark_enrichment_complete(&self.pool, name).await {
            error!(subreddit = %name, error = %e, "failed to mark enrichment complete");
            return;
        }
        info!(subreddit = %name, "enrichment complete");
    }

    async fn fail(&self, name: &str, message: &str) {
        if let Err(e) = subreddits::mark_enrichment_failed(&self.pool, name, message).await {
            error!(subreddit = %name, error = %e, "failed to record enrichment failure");
        }
        self.stats.lock().await.failed += 1;
    }

    /// The cooperative background loop. With no providers configured it
    /// logs once and stays idle.
    pub async fn run(&self) {
        if !self.providers.enabled() {
            warn!("enrichment worker idle: inference provider not configured");
            std::future::pending::<()>().await;
        }

        info!(
            interval_secs = self.config.check_interval.as_secs(),
            batch_size = self.config.batch_size,
            "enrichment worker started"
        );

        loop {
            match self.process_batch().await {
                Ok(_) => tokio::time::sleep(self.config.check_interval).await,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "enrichment batch failed");
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> EnrichmentCandidate {
        EnrichmentCandidate {
            subreddit_name: name.to_string(),
            title: Some("Software As a Service".to_string()),
            public_description: Some("SaaS founders and builders".to_string()),
            description: Some("A long community description\nwith newlines".to_string()),
            guidelines_text: Some("Be kind".to_string()),
            rules_text: Some("No spam | Self-promo Saturday only".to_string()),
            sample_posts: serde_json::json!([
                {"title": "Launched my MVP", "selftext_excerpt": "Six months of work"}
            ]),
            sample_posts_titles: Some("Launched my MVP | Pricing feedback".to_string()),
            advertiser_category: Some("Business".to_string()),
            embedding_status: Some("pending".to_string()),
            embedding_retry_count: 0,
            has_combined_embedding: false,
            has_persona_embedding: false,
            llm_enrichment: None,
        }
    }

    #[test]
    fn topic_text_has_labelled_sections() {
        let text = compose_topic_text(&candidate("SaaS"));
        assert!(text.contains("Title: Software As a Service"));
        assert!(text.contains("Description: SaaS founders"));
        assert!(text.contains("About: A long community description with newlines"));
        assert!(text.contains("Rules: No spam"));
        assert!(text.contains("Category: Business"));
    }

    #[test]
    fn empty_candidate_falls_back_to_name() {
        let mut c = candidate("emptysub");
        c.title = None;
        c.public_description = None;
        c.description = None;
        c.guidelines_text = None;
        c.rules_text = None;
        c.sample_posts_titles = None;
        c.advertiser_category = None;
        assert_eq!(compose_topic_text(&c), "Subreddit: emptysub");
    }

    #[test]
    fn persona_text_front_loads_audience_signals() {
        let enrichment = LlmEnrichment {
            audience_profile: "Early-stage SaaS founders seeking growth advice".to_string(),
            audience_types: vec!["founders".to_string(), "developers".to_string()],
            user_intents: vec!["get feedback".to_string()],
            pain_points: vec!["churn".to_string()],
            content_themes: vec!["pricing".to_string()],
            generated_at: None,
            model: None,
        };
        let text = compose_persona_text(&candidate("SaaS"), &enrichment);
        let audience_pos = text.find("Audience:").unwrap();
        let topic_pos = text.find("Subreddit:").unwrap();
        assert!(audience_pos < topic_pos);
        assert!(text.contains("User types: founders, developers"));
    }

    #[test]
    fn normalize_caps_list_lengths() {
        let raw = serde_json::json!({
            "audience_profile": "People",
            "audience_types": ["a", "b", "c", "d", "e", "f", "g", "h"],
            "user_intents": [],
            "pain_points": ["x"],
            "content_themes": []
        });
        let enrichment = normalize_enrichment(raw, "gpt-4o-mini", Utc::now()).unwrap();
        assert_eq!(enrichment.audience_types.len(), LIST_ITEM_CAP);
        assert_eq!(enrichment.model.as_deref(), Some("gpt-4o-mini"));
        assert!(enrichment.generated_at.is_some());
    }

    #[test]
    fn normalize_rejects_wrong_shape() {
        let raw = serde_json::json!({"audience_profile": 42});
        assert!(normalize_enrichment(raw, "m", Utc::now()).is_err());
    }

    #[test]
    fn profile_prompt_carries_observable_fields() {
        let prompt = build_profile_prompt(&candidate("SaaS"));
        assert!(prompt.contains("Subreddit: r/SaaS"));
        assert!(prompt.contains("Sample post content: Six months of work"));
        assert!(prompt.contains("Keep each list to 3-6 items"));
    }
}

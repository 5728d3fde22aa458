use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scraper instance lifecycle states. The supervisor is the sole writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperStatus {
    Starting,
    Running,
    Stopped,
    Failed,
    Error,
    Restarting,
}

impl ScraperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperStatus::Starting => "starting",
            ScraperStatus::Running => "running",
            ScraperStatus::Stopped => "stopped",
            ScraperStatus::Failed => "failed",
            ScraperStatus::Error => "error",
            ScraperStatus::Restarting => "restarting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(ScraperStatus::Starting),
            "running" => Some(ScraperStatus::Running),
            "stopped" => Some(ScraperStatus::Stopped),
            "failed" => Some(ScraperStatus::Failed),
            "error" => Some(ScraperStatus::Error),
            "restarting" => Some(ScraperStatus::Restarting),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperType {
    Posts,
    Comments,
}

impl ScraperType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperType::Posts => "posts",
            ScraperType::Comments => "comments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "posts" => Some(ScraperType::Posts),
            "comments" => Some(ScraperType::Comments),
            _ => None,
        }
    }
}

/// Listing sort used to request posts from Reddit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMethod {
    New,
    Hot,
    Rising,
    Top,
    Controversial,
}

impl SortMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMethod::New => "new",
            SortMethod::Hot => "hot",
            SortMethod::Rising => "rising",
            SortMethod::Top => "top",
            SortMethod::Controversial => "controversial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "new" => Some(SortMethod::New),
            "hot" => Some(SortMethod::Hot),
            "rising" => Some(SortMethod::Rising),
            "top" => Some(SortMethod::Top),
            "controversial" => Some(SortMethod::Controversial),
            _ => None,
        }
    }

    /// Only `top` and `controversial` accept a time filter on Reddit's API.
    pub fn takes_time_filter(&self) -> bool {
        matches!(self, SortMethod::Top | SortMethod::Controversial)
    }
}

/// Reddit OAuth credentials for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

pub const MASKED_CREDENTIAL: &str = "***";

impl RedditCredentials {
    /// Copy safe for any externally-visible surface: secrets replaced by a
    /// constant sentinel, username and user agent retained for identification.
    pub fn masked(&self) -> Self {
        Self {
            client_id: MASKED_CREDENTIAL.to_string(),
            client_secret: MASKED_CREDENTIAL.to_string(),
            username: self.username.clone(),
            password: MASKED_CREDENTIAL.to_string(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Run parameters for one scraper instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperRunConfig {
    pub posts_limit: u32,
    /// Seconds between cycles
    pub interval: u64,
    pub comment_batch: u32,
    pub sorting_methods: Vec<String>,
}

/// Metrics embedded in the scraper row. The worker is the sole writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScraperMetrics {
    pub total_posts_collected: i64,
    pub total_comments_collected: i64,
    pub total_cycles: i64,
    pub last_cycle_posts: i64,
    pub last_cycle_comments: i64,
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub last_cycle_duration: f64,
    pub posts_per_hour: f64,
    pub comments_per_hour: f64,
    pub avg_cycle_duration: f64,
}

/// One scraper instance row from the control collection.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScraperInstance {
    pub subreddit: String,
    pub scraper_type: String,
    pub subreddits: Vec<String>,
    pub account_name: String,
    pub posts_limit: i32,
    pub interval_secs: i64,
    pub comment_batch: i32,
    pub sorting_methods: Vec<String>,
    pub auto_restart: bool,
    pub status: String,
    pub container_handle: Option<String>,
    pub restart_count: i32,
    pub last_error: Option<String>,
    pub metrics: serde_json::Value,
    pub pending_scrape: Vec<String>,
    pub scrape_failures: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ScraperInstance {
    pub fn run_config(&self) -> ScraperRunConfig {
        ScraperRunConfig {
            posts_limit: self.posts_limit.max(0) as u32,
            interval: self.interval_secs.max(0) as u64,
            comment_batch: self.comment_batch.max(0) as u32,
            sorting_methods: self.sorting_methods.clone(),
        }
    }

    pub fn metrics(&self) -> ScraperMetrics {
        serde_json::from_value(self.metrics.clone()).unwrap_or_default()
    }
}

/// A harvested post, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDocument {
    pub post_id: String,
    pub subreddit: String,
    pub title: String,
    pub author: String,
    pub url: String,
    pub reddit_url: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: f64,
    pub created_datetime: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
    /// Truncated to 1000 chars at materialisation time
    pub selftext: String,
    pub is_self: bool,
    pub upvote_ratio: f64,
    pub distinguished: Option<String>,
    pub stickied: bool,
    pub over_18: bool,
    pub spoiler: bool,
    pub locked: bool,
    /// Which listing first observed this post in the current cycle
    pub sort_method: String,
    pub comments_scraped: bool,
    pub initial_comments_scraped: bool,
    pub last_comment_fetch_time: Option<DateTime<Utc>>,
    pub comments_scraped_at: Option<DateTime<Utc>>,
}

/// Comment parent discriminator: top-level comments hang off the post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentKind {
    Post,
    Comment,
}

impl ParentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Post => "post",
            ParentKind::Comment => "comment",
        }
    }
}

/// A harvested comment, as persisted. Flat record; the tree is
/// reconstructed through `parent_id`/`parent_type` lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentDocument {
    pub comment_id: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub parent_type: ParentKind,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: f64,
    pub created_datetime: Option<DateTime<Utc>>,
    pub depth: i32,
    pub is_submitter: bool,
    pub distinguished: Option<String>,
    pub stickied: bool,
    pub edited: bool,
    pub controversiality: i64,
    pub gilded: i64,
    pub total_awards_received: i64,
    pub subreddit: String,
    pub scraped_at: DateTime<Utc>,
}

/// Enrichment pipeline state on a subreddit metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Complete,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Complete => "complete",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

/// One community rule as Reddit reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditRule {
    pub short_name: String,
    pub description: String,
    pub kind: Option<String>,
    pub priority: Option<i64>,
}

/// Sample post captured during the metadata phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePost {
    pub title: String,
    pub selftext_excerpt: String,
    pub score: i64,
}

/// Community metadata document as written by the worker metadata phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditMetadataDoc {
    pub subreddit_name: String,
    pub display_name: String,
    pub title: String,
    pub public_description: String,
    pub description: String,
    pub url: String,
    pub subscribers: i64,
    pub active_user_count: Option<i64>,
    pub over_18: bool,
    pub lang: Option<String>,
    pub created_utc: f64,
    pub created_datetime: DateTime<Utc>,
    pub submission_type: Option<String>,
    pub advertiser_category: Option<String>,
    pub quarantine: bool,
    pub icon_img: Option<String>,
    pub community_icon: Option<String>,
    pub rules: Vec<SubredditRule>,
    pub rules_text: String,
    pub guidelines_text: String,
    pub sample_posts: Vec<SamplePost>,
    pub sample_posts_titles: String,
    pub scraped_at: DateTime<Utc>,
}

/// LLM-derived audience profile stored under `llm_enrichment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEnrichment {
    pub audience_profile: String,
    #[serde(default)]
    pub audience_types: Vec<String>,
    #[serde(default)]
    pub user_intents: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub content_themes: Vec<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Subreddit metadata as read back for the enrichment pipeline.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrichmentCandidate {
    pub subreddit_name: String,
    pub title: Option<String>,
    pub public_description: Option<String>,
    pub description: Option<String>,
    pub guidelines_text: Option<String>,
    pub rules_text: Option<String>,
    pub sample_posts: serde_json::Value,
    pub sample_posts_titles: Option<String>,
    pub advertiser_category: Option<String>,
    pub embedding_status: Option<String>,
    pub embedding_retry_count: i32,
    pub has_combined_embedding: bool,
    pub has_persona_embedding: bool,
    pub llm_enrichment: Option<serde_json::Value>,
}

/// Snapshot of Reddit's rate-limit headers at flush time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub remaining: Option<f64>,
    pub used: Option<f64>,
    pub reset_in_seconds: Option<f64>,
}

/// One api_usage row, appended at the end of every worker cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUsageRecord {
    pub subreddit: String,
    pub scraper_type: String,
    pub container_handle: String,
    pub timestamp: DateTime<Utc>,
    pub minute_bucket: DateTime<Utc>,
    pub hour_bucket: DateTime<Utc>,
    pub day_bucket: DateTime<Utc>,
    /// Logical call counts keyed by call type
    pub calls: serde_json::Value,
    pub total_calls: i64,
    pub avg_response_time_ms: f64,
    pub errors: i64,
    pub cycle_duration_seconds: f64,
    pub rate_limit: Option<RateLimitSnapshot>,
    pub actual_http_requests: i64,
    pub estimated_cost_usd: f64,
    /// logical / actual; < 1.0 means the client library issued hidden requests
    pub accuracy_ratio: f64,
}

/// Error types recorded into scrape_errors.
pub mod error_types {
    pub const SCRAPE_FAILED: &str = "scrape_failed";
    pub const SAVE_FAILED: &str = "save_failed";
    pub const VERIFICATION_FAILED: &str = "verification_failed";
    pub const SORT_FETCH_FAILED: &str = "sort_fetch_failed";
    pub const METADATA_FAILED: &str = "metadata_failed";
}

/// Externally-inserted suggestion batch awaiting sync.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SuggestionBatch {
    pub id: i64,
    /// List of `{"name": "..."}` objects
    pub subreddits: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub synced_to_scraper: Option<String>,
}

impl SuggestionBatch {
    /// Lower-cased, trimmed, de-duplicated names carried by this batch.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(items) = self.subreddits.as_array() {
            for item in items {
                if let Some(name) = item.get("name").and_then(|n| n.as_str()) {
                    let name = name.trim().to_lowercase();
                    if !name.is_empty() && !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            ScraperStatus::Starting,
            ScraperStatus::Running,
            ScraperStatus::Stopped,
            ScraperStatus::Failed,
            ScraperStatus::Error,
            ScraperStatus::Restarting,
        ] {
            assert_eq!(ScraperStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ScraperStatus::parse("paused"), None);
    }

    #[test]
    fn sort_method_time_filter() {
        assert!(SortMethod::Top.takes_time_filter());
        assert!(SortMethod::Controversial.takes_time_filter());
        assert!(!SortMethod::New.takes_time_filter());
        assert_eq!(SortMethod::parse(" Hot "), Some(SortMethod::Hot));
    }

    #[test]
    fn masked_credentials_keep_identity_only() {
        let creds = RedditCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "scraper_bot".to_string(),
            password: "hunter2".to_string(),
            user_agent: "subfleet/0.3".to_string(),
        };
        let masked = creds.masked();
        assert_eq!(masked.client_secret, MASKED_CREDENTIAL);
        assert_eq!(masked.password, MASKED_CREDENTIAL);
        assert_eq!(masked.username, "scraper_bot");
        assert_eq!(masked.user_agent, "subfleet/0.3");
    }

    #[test]
    fn suggestion_names_deduplicate_case_insensitively() {
        let batch = SuggestionBatch {
            id: 1,
            subreddits: serde_json::json!([
                {"name": "alpha"},
                {"name": "ALPHA"},
                {"name": " beta "},
                {"name": ""},
                {"other": "ignored"}
            ]),
            created_at: Utc::now(),
            synced_at: None,
            synced_to_scraper: None,
        };
        assert_eq!(batch.names(), vec!["alpha".to_string(), "beta".to_string()]);
    }
}

//! Phase C: community metadata refresh.
//!
//! Gated on elapsed time since the stored row's `last_updated`; fires
//! for communities with no stored metadata at all. The write path
//! decides whether the changes warrant re-enrichment.

use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use subfleet_core::models::{
    error_types, SamplePost, SortMethod, SubredditMetadataDoc, SubredditRule,
};
use subfleet_core::retry::retry_with_policy;
use subfleet_core::storage::{errors, subreddits};
use subfleet_reddit::governor;
use subfleet_reddit::models::{PostData, RuleData, SubredditAbout};

use crate::cycle::WorkerCtx;
use crate::tracker::{call_types, CallTracker};

const SAMPLE_POST_COUNT: u32 = 20;
const SAMPLE_EXCERPT_LEN: usize = 200;

/// Whether the refresh should fire for a community.
pub fn refresh_due(
    last_updated: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_secs: i64,
) -> bool {
    match last_updated {
        None => true,
        Some(ts) => (now - ts).num_seconds() >= interval_secs,
    }
}

/// Concatenate structured rules into one searchable text.
pub fn compose_rules_text(rules: &[SubredditRule]) -> String {
    rules
        .iter()
        .map(|r| {
            if r.description.is_empty() {
                r.short_name.clone()
            } else {
                format!("{}: {}", r.short_name, r.description)
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn compose_sample_titles(samples: &[SamplePost]) -> String {
    samples
        .iter()
        .map(|s| s.title.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

fn convert_rules(rules: Vec<RuleData>) -> Vec<SubredditRule> {
    rules
        .into_iter()
        .map(|r| SubredditRule {
            short_name: r.short_name,
            description: r.description,
            kind: r.kind,
            priority: r.priority,
        })
        .collect()
}

fn convert_samples(posts: &[PostData]) -> Vec<SamplePost> {
    posts
        .iter()
        .map(|p| SamplePost {
            title: p.title.clone(),
            selftext_excerpt: p.selftext.chars().take(SAMPLE_EXCERPT_LEN).collect(),
            score: p.score,
        })
        .collect()
}

fn build_doc(
    subreddit: &str,
    about: SubredditAbout,
    rules: Vec<SubredditRule>,
    guidelines_text: String,
    samples: Vec<SamplePost>,
    now: DateTime<Utc>,
) -> SubredditMetadataDoc {
    let rules_text = compose_rules_text(&rules);
    let sample_posts_titles = compose_sample_titles(&samples);
    let created_datetime = Utc
        .timestamp_opt(about.created_utc as i64, 0)
        .single()
        .unwrap_or(now);

    SubredditMetadataDoc {
        subreddit_name: subreddit.to_string(),
        display_name: about.display_name,
        title: about.title,
        public_description: about.public_description,
        description: about.description,
        url: about.url,
        subscribers: about.subscribers.unwrap_or(0),
        active_user_count: about.active_user_count,
        over_18: about.over18,
        lang: about.lang,
        created_utc: about.created_utc,
        created_datetime,
        submission_type: about.submission_type,
        advertiser_category: about.advertiser_category,
        quarantine: about.quarantine,
        icon_img: about.icon_img,
        community_icon: about.community_icon,
        rules,
        rules_text,
        guidelines_text,
        sample_posts: samples,
        sample_posts_titles,
        scraped_at: now,
    }
}

/// Refresh metadata for every due subreddit.
pub async fn refresh(ctx: &WorkerCtx, tracker: &mut CallTracker) -> Result<usize> {
    let now = Utc::now();
    let interval_secs = ctx.defaults.subreddit_update_interval.as_secs() as i64;
    let mut refreshed = 0usize;

    for subreddit in &ctx.params.subreddits {
        let last_updated = subreddits::metadata_last_updated(&ctx.pool, subreddit).await?;
        if !refresh_due(last_updated, now, interval_secs) {
            continue;
        }

        governor::check_budget(ctx.client.transport(), ctx.defaults.min_remaining_budget).await;

        let started = Instant::now();
        let result = retry_with_policy(&ctx.retry_policy, "subreddit_metadata", || async {
            let about = ctx.client.subreddit_about(subreddit).await?;
            let rules = ctx.client.subreddit_rules(subreddit).await?;
            let guidelines = ctx.client.post_guidelines(subreddit).await?;
            let samples = ctx
                .client
                .listing(subreddit, SortMethod::Top, Some("week"), SAMPLE_POST_COUNT)
                .await?;
            Ok::<_, subfleet_reddit::RedditError>((about, rules, guidelines, samples))
        })
        .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok((about, rules, guidelines, samples)) => {
                tracker.track(call_types::METADATA_FETCH, elapsed_ms, true);

                let doc = build_doc(
                    subreddit,
                    about,
                    convert_rules(rules),
                    guidelines.unwrap_or_default(),
                    convert_samples(&samples),
                    Utc::now(),
                );

                let pending = subreddits::upsert_metadata(&ctx.pool, &doc).await?;
                refreshed += 1;
                info!(
                    subreddit = %subreddit,
                    subscribers = doc.subscribers,
                    rules = doc.rules.len(),
                    samples = doc.sample_posts.len(),
                    embedding_pending = pending,
                    "community metadata refreshed"
                );
            }
            Err(e) => {
                tracker.track(call_types::METADATA_FETCH, elapsed_ms, false);
                warn!(subreddit = %subreddit, error = %e, "metadata refresh failed");
                errors::record_error(
                    &ctx.pool,
                    Some(subreddit),
                    None,
                    error_types::METADATA_FAILED,
                    &e.to_string(),
                    ctx.retry_policy.max_retries as i32,
                )
                .await
                .ok();
            }
        }
    }

    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn refresh_fires_without_stored_metadata() {
        assert!(refresh_due(None, Utc::now(), 86400));
    }

    #[test]
    fn refresh_gates_on_interval() {
        let now = Utc::now();
        assert!(!refresh_due(Some(now - Duration::hours(1)), now, 86400));
        assert!(refresh_due(Some(now - Duration::hours(25)), now, 86400));
        assert!(refresh_due(Some(now - Duration::seconds(86400)), now, 86400));
    }

    #[test]
    fn rules_text_concatenates_name_and_description() {
        let rules = vec![
            SubredditRule {
                short_name: "No spam".to_string(),
                description: "Keep it on topic".to_string(),
                kind: None,
                priority: Some(0),
            },
            SubredditRule {
                short_name: "Be civil".to_string(),
                description: String::new(),
                kind: None,
                priority: Some(1),
            },
        ];
        assert_eq!(
            compose_rules_text(&rules),
            "No spam: Keep it on topic | Be civil"
        );
    }

    #[test]
    fn sample_titles_join_with_pipes() {
        let samples = vec![
            SamplePost {
                title: "first".to_string(),
                selftext_excerpt: String::new(),
                score: 1,
            },
            SamplePost {
                title: "second".to_string(),
                selftext_excerpt: String::new(),
                score: 2,
            },
        ];
        assert_eq!(compose_sample_titles(&samples), "first | second");
    }
}

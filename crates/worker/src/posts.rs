//! Phase A: multi-sort post harvest.
//!
//! Each configured sort contributes a listing; posts are deduplicated by
//! id across sorts within the cycle, so the batch holds the union. The
//! first listing to observe a post stamps its `sort_method`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use subfleet_core::models::{error_types, PostDocument, SortMethod};
use subfleet_core::retry::retry_with_policy;
use subfleet_core::storage::posts::UpsertCounts;
use subfleet_core::storage::{errors, posts};
use subfleet_reddit::governor;
use subfleet_reddit::models::PostData;

use crate::cycle::WorkerCtx;
use crate::tracker::{call_types, CallTracker};

const INTER_SORT_DELAY: Duration = Duration::from_secs(2);

const SELFTEXT_LIMIT: usize = 1000;

/// Time filter for sorts that take one. A subreddit's first harvest
/// widens `top` to a month of history; steady state looks at the day.
pub fn time_filter_for(sort: SortMethod, first_run: bool) -> Option<&'static str> {
    if !sort.takes_time_filter() {
        return None;
    }
    match sort {
        SortMethod::Top if first_run => Some("month"),
        _ => Some("day"),
    }
}

/// Materialise a listing item with fresh comment-tracking fields; the
/// persistence layer preserves any prior tracking state on conflict.
pub fn materialize_post(
    data: &PostData,
    subreddit: &str,
    sort: SortMethod,
    now: DateTime<Utc>,
) -> PostDocument {
    let created_datetime = Utc
        .timestamp_opt(data.created_utc as i64, 0)
        .single()
        .unwrap_or(now);

    let selftext: String = data.selftext.chars().take(SELFTEXT_LIMIT).collect();

    PostDocument {
        post_id: data.id.clone(),
        subreddit: subreddit.to_string(),
        title: data.title.clone(),
        author: data.author_name(),
        url: data.url.clone(),
        reddit_url: data.reddit_url(),
        score: data.score,
        num_comments: data.num_comments,
        created_utc: data.created_utc,
        created_datetime,
        scraped_at: now,
        selftext,
        is_self: data.is_self,
        upvote_ratio: data.upvote_ratio.unwrap_or(0.0),
        distinguished: data.distinguished.clone(),
        stickied: data.stickied,
        over_18: data.over_18,
        spoiler: data.spoiler,
        locked: data.locked,
        sort_method: sort.as_str().to_string(),
        comments_scraped: false,
        initial_comments_scraped: false,
        last_comment_fetch_time: None,
        comments_scraped_at: None,
    }
}

#[derive(Debug, Default)]
pub struct HarvestOutcome {
    pub fetched: usize,
    pub distinct: usize,
    pub counts: UpsertCounts,
}

/// Run the harvest for every target subreddit and commit the batch.
pub async fn harvest(ctx: &WorkerCtx, tracker: &mut CallTracker) -> Result<HarvestOutcome> {
    let mut batch: Vec<PostDocument> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut fetched = 0usize;

    for subreddit in &ctx.params.subreddits {
        // One-shot bootstrap condition, evaluated per subreddit.
        let first_run = posts::count_posts_for_subreddit(&ctx.pool, subreddit).await? == 0;
        if first_run {
            info!(subreddit = %subreddit, "no stored posts yet, widening top listing window");
        }

        for (i, &sort) in ctx.params.sorting_methods.iter().enumerate() {
            governor::check_budget(ctx.client.transport(), ctx.defaults.min_remaining_budget)
                .await;

            let time_filter = time_filter_for(sort, first_run);
            let started = Instant::now();
            let result = retry_with_policy(&ctx.retry_policy, "posts_listing", || {
                ctx.client
                    .listing(subreddit, sort, time_filter, ctx.params.posts_limit)
            })
            .await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(listing) => {
                    tracker.track(call_types::POSTS_FETCH, elapsed_ms, true);
                    fetched += listing.len();
                    let now = Utc::now();
                    for post in &listing {
                        if seen.insert(post.id.clone()) {
                            batch.push(materialize_post(post, subreddit, sort, now));
                        }
                    }
                    info!(
                        subreddit = %subreddit,
                        sort = sort.as_str(),
                        fetched = listing.len(),
                        distinct_so_far = batch.len(),
                        "listing harvested"
                    );
                }
                Err(e) => {
                    tracker.track(call_types::POSTS_FETCH, elapsed_ms, false);
                    warn!(subreddit = %subreddit, sort = sort.as_str(), error = %e, "listing failed, skipping sort");
                    errors::record_error(
                        &ctx.pool,
                        Some(subreddit),
                        None,
                        error_types::SORT_FETCH_FAILED,
                        &format!("{} listing failed: {}", sort.as_str(), e),
                        ctx.retry_policy.max_retries as i32,
                    )
                    .await
                    .ok();
                }
            }

            if i + 1 < ctx.params.sorting_methods.len() {
                tokio::time::sleep(INTER_SORT_DELAY).await;
            }
        }
    }

    let counts = posts::upsert_posts(&ctx.pool, &batch).await?;
    info!(
        fetched,
        distinct = batch.len(),
        inserted = counts.inserted,
        modified = counts.modified,
        "post batch committed"
    );

    for subreddit in &ctx.params.subreddits {
        let n = batch.iter().filter(|p| &p.subreddit == subreddit).count();
        if n > 0 {
            subfleet_core::observability::metrics()
                .posts_collected_total
                .with_label_values(&[subreddit])
                .inc_by(n as u64);
        }
    }

    Ok(HarvestOutcome {
        fetched,
        distinct: batch.len(),
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_widens_on_first_run_only() {
        assert_eq!(time_filter_for(SortMethod::Top, true), Some("month"));
        assert_eq!(time_filter_for(SortMethod::Top, false), Some("day"));
        assert_eq!(time_filter_for(SortMethod::Controversial, true), Some("day"));
        assert_eq!(time_filter_for(SortMethod::New, true), None);
        assert_eq!(time_filter_for(SortMethod::Hot, false), None);
    }

    fn post(id: &str) -> PostData {
        PostData {
            id: id.to_string(),
            title: format!("post {}", id),
            selftext: "x".repeat(2000),
            author: None,
            subreddit: "rust".to_string(),
            url: String::new(),
            permalink: format!("/r/rust/comments/{}/", id),
            created_utc: 1700000000.0,
            score: 10,
            num_comments: 4,
            upvote_ratio: Some(0.97),
            distinguished: None,
            stickied: false,
            over_18: false,
            spoiler: false,
            locked: false,
            is_self: true,
        }
    }

    #[test]
    fn materialized_post_truncates_text_and_zeroes_tracking() {
        let doc = materialize_post(&post("abc"), "rust", SortMethod::New, Utc::now());
        assert_eq!(doc.selftext.chars().count(), SELFTEXT_LIMIT);
        assert_eq!(doc.author, "[deleted]");
        assert_eq!(doc.sort_method, "new");
        assert!(!doc.comments_scraped);
        assert!(!doc.initial_comments_scraped);
        assert!(doc.last_comment_fetch_time.is_none());
        assert!(doc.comments_scraped_at.is_none());
    }

    #[test]
    fn cross_sort_dedup_keeps_first_observer() {
        // The union of [new: a,b,c] and [top: b,c,d] is four posts, with
        // b and c credited to the sort that saw them first.
        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        let now = Utc::now();

        for id in ["a", "b", "c"] {
            if seen.insert(id.to_string()) {
                batch.push(materialize_post(&post(id), "rust", SortMethod::New, now));
            }
        }
        for id in ["b", "c", "d"] {
            if seen.insert(id.to_string()) {
                batch.push(materialize_post(&post(id), "rust", SortMethod::Top, now));
            }
        }

        assert_eq!(batch.len(), 4);
        let b = batch.iter().find(|p| p.post_id == "b").unwrap();
        assert_eq!(b.sort_method, "new");
        let d = batch.iter().find(|p| p.post_id == "d").unwrap();
        assert_eq!(d.sort_method, "top");
    }
}

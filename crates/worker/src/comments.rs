//! Phase B: priority-ordered comment refresh.
//!
//! Candidates come back from the store already tiered (never-scraped
//! first, then by activity and staleness). Each candidate's tree is
//! walked against the set of already-stored comment ids, everything
//! accumulates into one cross-post batch, and only after the batch
//! commit are posts marked — initial scrapes only once the store
//! verifiably holds their comments.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use subfleet_core::models::{error_types, CommentDocument};
use subfleet_core::retry::retry_with_policy;
use subfleet_core::storage::{comments, errors, posts};
use subfleet_reddit::governor;
use subfleet_reddit::tree::{self, WalkContext};

use crate::cycle::WorkerCtx;
use crate::tracker::{call_types, CallTracker};

const INTER_POST_DELAY: Duration = Duration::from_secs(2);

/// Per-candidate scrape outcome feeding the verification step.
#[derive(Debug, Clone)]
pub struct PostScrapeResult {
    pub post_id: String,
    pub subreddit: String,
    pub was_initial: bool,
    /// New comments the in-memory walk claims to have produced
    pub claimed_new: usize,
}

/// An initial candidate may be marked scraped when the walk produced
/// nothing (the post legitimately has no comments yet) or when the store
/// verifiably holds comments for it. Claiming comments that the store
/// does not show is the ghost-post pathology and must not mark.
pub fn should_mark_initial(claimed_new: usize, stored_count: i64) -> bool {
    claimed_new == 0 || stored_count > 0
}

#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub posts_processed: usize,
    pub new_comments: u64,
    pub initial_marked: usize,
    pub updates_marked: usize,
    pub verification_failures: usize,
}

pub async fn refresh(ctx: &WorkerCtx, tracker: &mut CallTracker) -> Result<RefreshOutcome> {
    let candidates = posts::comment_refresh_candidates(
        &ctx.pool,
        &ctx.params.subreddits,
        ctx.params.comment_batch as i64,
    )
    .await?;

    if candidates.is_empty() {
        info!("no posts need a comment refresh");
        return Ok(RefreshOutcome::default());
    }

    info!(candidates = candidates.len(), "starting comment refresh");

    let mut batch: Vec<CommentDocument> = Vec::new();
    let mut results: Vec<PostScrapeResult> = Vec::new();

    for (i, candidate) in candidates.iter().enumerate() {
        governor::check_budget(ctx.client.transport(), ctx.defaults.min_remaining_budget).await;

        let existing = comments::existing_comment_ids(&ctx.pool, &candidate.post_id).await?;

        let started = Instant::now();
        let fetched = retry_with_policy(&ctx.retry_policy, "submission_comments", || {
            ctx.client.submission_comments(&candidate.post_id)
        })
        .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let children = match fetched {
            Ok(children) => {
                tracker.track(call_types::COMMENTS_FETCH, elapsed_ms, true);
                children
            }
            Err(e) => {
                tracker.track(call_types::COMMENTS_FETCH, elapsed_ms, false);
                warn!(post_id = %candidate.post_id, error = %e, "comment fetch failed, skipping post");
                errors::record_error(
                    &ctx.pool,
                    Some(&candidate.subreddit),
                    Some(&candidate.post_id),
                    error_types::SCRAPE_FAILED,
                    &e.to_string(),
                    ctx.retry_policy.max_retries as i32,
                )
                .await
                .ok();
                continue;
            }
        };

        let walk_ctx = WalkContext {
            post_id: &candidate.post_id,
            subreddit: &candidate.subreddit,
            existing_ids: &existing,
            max_depth: ctx.defaults.max_comment_depth,
            scraped_at: Utc::now(),
        };
        let mut walk = tree::walk_comment_tree(&children, &walk_ctx);

        // Expand "more comments" stubs up to the configured cap.
        if !walk.more_ids.is_empty() && ctx.defaults.more_comments_limit != Some(0) {
            let started = Instant::now();
            let expanded = ctx
                .client
                .more_children(
                    &candidate.post_id,
                    &walk.more_ids,
                    ctx.defaults.more_comments_limit,
                )
                .await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match expanded {
                Ok(things) => {
                    tracker.track(call_types::COMMENTS_EXPAND, elapsed_ms, true);
                    let known_depths: HashMap<String, i32> = walk
                        .comments
                        .iter()
                        .map(|c| (c.comment_id.clone(), c.depth))
                        .collect();
                    walk.comments
                        .extend(tree::integrate_more_things(&things, &known_depths, &walk_ctx));
                }
                Err(e) => {
                    tracker.track(call_types::COMMENTS_EXPAND, elapsed_ms, false);
                    warn!(post_id = %candidate.post_id, error = %e, "more-comments expansion failed, continuing with partial tree");
                }
            }
        }

        let claimed_new = walk.comments.len();
        info!(
            post_id = %candidate.post_id,
            title = %candidate.title.chars().take(50).collect::<String>(),
            new = claimed_new,
            already_stored = walk.already_stored,
            initial = !candidate.initial_comments_scraped,
            "comments walked"
        );

        batch.extend(walk.comments);
        results.push(PostScrapeResult {
            post_id: candidate.post_id.clone(),
            subreddit: candidate.subreddit.clone(),
            was_initial: !candidate.initial_comments_scraped,
            claimed_new,
        });

        if i + 1 < candidates.len() {
            tokio::time::sleep(INTER_POST_DELAY).await;
        }
    }

    let counts = comments::upsert_comments(&ctx.pool, &batch).await?;
    info!(
        inserted = counts.inserted,
        modified = counts.modified,
        "comment batch committed"
    );

    // Verification: an initial candidate that claimed comments must show
    // them in the store before it may be marked scraped.
    let mut initial_ids: Vec<String> = Vec::new();
    let mut update_ids: Vec<String> = Vec::new();
    let mut verification_failures = 0usize;

    for result in &results {
        if !result.was_initial {
            update_ids.push(result.post_id.clone());
            continue;
        }

        let stored = if result.claimed_new > 0 {
            comments::count_comments_for_post(&ctx.pool, &result.post_id).await?
        } else {
            0
        };

        if should_mark_initial(result.claimed_new, stored) {
            initial_ids.push(result.post_id.clone());
        } else {
            verification_failures += 1;
            warn!(
                post_id = %result.post_id,
                claimed = result.claimed_new,
                "verification failed: store shows no comments, not marking"
            );
            errors::record_error(
                &ctx.pool,
                Some(&result.subreddit),
                Some(&result.post_id),
                error_types::VERIFICATION_FAILED,
                &format!(
                    "expected {} comments but found 0 in store",
                    result.claimed_new
                ),
                0,
            )
            .await
            .ok();
        }
    }

    posts::mark_posts_comment_state(&ctx.pool, &initial_ids, true).await?;
    posts::mark_posts_comment_state(&ctx.pool, &update_ids, false).await?;

    for result in &results {
        if result.claimed_new > 0 {
            subfleet_core::observability::metrics()
                .comments_collected_total
                .with_label_values(&[&result.subreddit])
                .inc_by(result.claimed_new as u64);
        }
    }

    info!(
        posts = results.len(),
        initial = initial_ids.len(),
        updates = update_ids.len(),
        new_comments = counts.inserted,
        verification_failures,
        "comment refresh complete"
    );

    Ok(RefreshOutcome {
        posts_processed: results.len(),
        new_comments: counts.inserted,
        initial_marked: initial_ids.len(),
        updates_marked: update_ids.len(),
        verification_failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_claimed_comments_still_marks_initial() {
        // The post legitimately has no comments yet; update cycles will
        // catch later additions.
        assert!(should_mark_initial(0, 0));
    }

    #[test]
    fn verified_comments_mark_initial() {
        assert!(should_mark_initial(4, 4));
        assert!(should_mark_initial(4, 1));
    }

    #[test]
    fn claimed_but_absent_comments_do_not_mark() {
        // Ghost-post protection: the walk claimed 4 comments but the
        // store shows none.
        assert!(!should_mark_initial(4, 0));
    }

    #[test]
    fn partition_separates_initial_from_update() {
        let results = vec![
            PostScrapeResult {
                post_id: "p1".to_string(),
                subreddit: "rust".to_string(),
                was_initial: true,
                claimed_new: 3,
            },
            PostScrapeResult {
                post_id: "p2".to_string(),
                subreddit: "rust".to_string(),
                was_initial: false,
                claimed_new: 0,
            },
        ];

        let initial: Vec<_> = results.iter().filter(|r| r.was_initial).collect();
        let update: Vec<_> = results.iter().filter(|r| !r.was_initial).collect();
        assert_eq!(initial.len(), 1);
        assert_eq!(update.len(), 1);
        // Zero new comments on an update pass is a legitimate no-op and
        // still refreshes the fetch time.
        assert_eq!(update[0].post_id, "p2");
    }
}

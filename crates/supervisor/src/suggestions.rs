//! Suggestions sync worker.
//!
//! Drains externally-proposed subreddit names into the single running
//! posts scraper. Names are lower-cased, de-duplicated against the
//! target's current queue, appended with priority, and the drained
//! suggestion batches are stamped synced. With no active target the
//! batches simply wait.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use subfleet_core::config::SuggestionsSyncConfig;
use subfleet_core::storage::{scrapers, suggestions, PgPool};

#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub synced: u64,
    pub skipped: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<SyncOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
    pub target: Option<String>,
}

/// Split the suggested union into genuinely-new names and duplicates
/// already present in the target queue. Comparison is case-insensitive.
pub fn diff_against_queue(suggested: &[String], queue: &[String]) -> (Vec<String>, Vec<String>) {
    let existing: std::collections::HashSet<String> =
        queue.iter().map(|s| s.to_lowercase()).collect();

    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for name in suggested {
        if existing.contains(name) {
            skipped.push(name.clone());
        } else {
            added.push(name.clone());
        }
    }
    (added, skipped)
}

pub struct SuggestionsWorker {
    pool: PgPool,
    config: SuggestionsSyncConfig,
    stats: Mutex<SyncStats>,
}

impl SuggestionsWorker {
    pub fn new(pool: PgPool, config: SuggestionsSyncConfig) -> Self {
        Self {
            pool,
            config,
            stats: Mutex::new(SyncStats::default()),
        }
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.lock().await.clone()
    }

    /// One sync tick.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let pending = suggestions::pending(&self.pool).await?;
        if pending.is_empty() {
            return Ok(SyncOutcome::default());
        }

        let Some(target) =
            scrapers::find_active_target(&self.pool, &self.config.target_scraper_type).await?
        else {
            warn!("no active target scraper, suggestions will wait");
            return Ok(SyncOutcome::default());
        };

        // Union of suggested names across all pending batches.
        let mut suggested: Vec<String> = Vec::new();
        for batch in &pending {
            for name in batch.names() {
                if !suggested.contains(&name) {
                    suggested.push(name);
                }
            }
        }

        let ids: Vec<i64> = pending.iter().map(|b| b.id).collect();

        if suggested.is_empty() {
            // Empty batches are still drained so they are not reselected.
            suggestions::mark_synced(&self.pool, &ids, &target.subreddit).await?;
            return Ok(SyncOutcome {
                target: Some(target.subreddit),
                ..SyncOutcome::default()
            });
        }

        let (added, skipped) = diff_against_queue(&suggested, &target.subreddits);

        if !added.is_empty() {
            scrapers::append_subreddits(&self.pool, &target.subreddit, &target.scraper_type, &added)
                .await?;
        }
        suggestions::mark_synced(&self.pool, &ids, &target.subreddit).await?;

        {
            let mut stats = self.stats.lock().await;
            stats.synced += added.len() as u64;
            stats.skipped += skipped.len() as u64;
            stats.last_result = Some(SyncOutcome {
                added: added.clone(),
                skipped: skipped.clone(),
                target: Some(target.subreddit.clone()),
            });
        }

        if !added.is_empty() {
            info!(
                target = %target.subreddit,
                added = ?added,
                skipped = skipped.len(),
                "suggestions synced into scrape queue"
            );
        }

        Ok(SyncOutcome {
            added,
            skipped,
            target: Some(target.subreddit),
        })
    }

    /// The cooperative background loop.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            target_type = %self.config.target_scraper_type,
            "suggestions worker started"
        );

        loop {
            match self.sync_once().await {
                Ok(_) => {
                    self.stats.lock().await.last_run = Some(Utc::now());
                    tokio::time::sleep(self.config.check_interval).await;
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "suggestions sync failed");
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_filters_case_insensitively() {
        let suggested = vec!["alpha".to_string(), "beta".to_string()];
        let queue = vec!["Alpha".to_string()];
        let (added, skipped) = diff_against_queue(&suggested, &queue);
        assert_eq!(added, vec!["beta".to_string()]);
        assert_eq!(skipped, vec!["alpha".to_string()]);
    }

    #[test]
    fn empty_queue_accepts_everything() {
        let suggested = vec!["alpha".to_string(), "beta".to_string()];
        let (added, skipped) = diff_against_queue(&suggested, &[]);
        assert_eq!(added.len(), 2);
        assert!(skipped.is_empty());
    }
}

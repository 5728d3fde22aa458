//! Instance lifecycle ownership.
//!
//! The supervisor converges the live worker-process population to the
//! control collection's intent. It is the sole writer of `status`,
//! `container_handle` and `restart_count`; the in-memory index is only
//! touched while holding its lock, so lifecycle operations on the same
//! instance are serialised.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use subfleet_core::config::AppConfig;
use subfleet_core::encryption::CredentialCipher;
use subfleet_core::models::{
    RedditCredentials, ScraperInstance, ScraperStatus, ScraperType,
};
use subfleet_core::storage::{accounts, scrapers, usage, PgPool};

use crate::process::{handle_name, WorkerHandle};

/// A live instance as the supervisor tracks it. Credentials in the
/// in-memory view are masked; workers received theirs at spawn.
pub struct ActiveScraper {
    pub handle: Option<WorkerHandle>,
    pub credentials: RedditCredentials,
    pub subreddits: Vec<String>,
    pub status: ScraperStatus,
    pub last_error: Option<String>,
}

/// A validated start request.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub subreddits: Vec<String>,
    pub scraper_type: ScraperType,
    pub account_name: String,
    pub posts_limit: u32,
    pub interval_secs: u64,
    pub comment_batch: u32,
    pub sorting_methods: Vec<String>,
    pub auto_restart: bool,
}

type InstanceKey = (String, String);

pub struct Supervisor {
    pool: PgPool,
    config: AppConfig,
    cipher: CredentialCipher,
    active: Mutex<HashMap<InstanceKey, ActiveScraper>>,
}

/// Whether a stopped/failed instance has cooled down enough to respawn.
pub fn cooldown_elapsed(
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    (now - last_updated).num_seconds() > cooldown.as_secs() as i64
}

fn key_of(subreddit: &str, scraper_type: &str) -> InstanceKey {
    (subreddit.to_string(), scraper_type.to_string())
}

impl Supervisor {
    pub fn new(pool: PgPool, config: AppConfig, cipher: CredentialCipher) -> Self {
        Self {
            pool,
            config,
            cipher,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Rehydrate the in-memory index from the control collection. Rows
    /// claiming `running` have no surviving process after a supervisor
    /// restart; the liveness loop will respawn them.
    pub async fn reconcile_on_startup(&self) -> Result<()> {
        let instances = scrapers::list_instances(&self.pool).await?;
        let mut active = self.active.lock().await;

        for instance in &instances {
            let Some(credentials) = accounts::get_account(
                &self.pool,
                &self.cipher,
                &instance.account_name,
            )
            .await?
            else {
                warn!(
                    subreddit = %instance.subreddit,
                    account = %instance.account_name,
                    "stored instance references a missing account"
                );
                continue;
            };

            active.insert(
                key_of(&instance.subreddit, &instance.scraper_type),
                ActiveScraper {
                    handle: None,
                    credentials: credentials.masked(),
                    subreddits: instance.subreddits.clone(),
                    status: ScraperStatus::parse(&instance.status)
                        .unwrap_or(ScraperStatus::Stopped),
                    last_error: instance.last_error.clone(),
                },
            );
        }

        info!(count = instances.len(), "reconciled instances from control collection");
        Ok(())
    }

    /// Validate and launch a new (or re-registered) scraper instance.
    pub async fn start_scraper(&self, request: StartRequest) -> Result<()> {
        if request.subreddits.is_empty() {
            bail!("at least one target subreddit is required");
        }
        let cap = self.config.scraper.max_subreddits_per_instance;
        if request.subreddits.len() > cap {
            bail!(
                "{} subreddits requested, cap is {} per instance",
                request.subreddits.len(),
                cap
            );
        }

        let credentials = accounts::get_account(&self.pool, &self.cipher, &request.account_name)
            .await?
            .with_context(|| format!("unknown account '{}'", request.account_name))?;

        let primary = request.subreddits[0].clone();
        let scraper_type = request.scraper_type.as_str();

        scrapers::register_instance(
            &self.pool,
            &primary,
            scraper_type,
            &request.subreddits,
            &request.account_name,
            request.posts_limit as i32,
            request.interval_secs as i64,
            request.comment_batch as i32,
            &request.sorting_methods,
            request.auto_restart,
        )
        .await?;

        let mut active = self.active.lock().await;
        self.spawn_locked(
            &mut active,
            &primary,
            scraper_type,
            &request.subreddits,
            &credentials,
            request.posts_limit,
            request.interval_secs,
            request.comment_batch,
            &request.sorting_methods,
        )
        .await
    }

    /// Spawn the worker process for an instance and record the outcome.
    /// Callers hold the index lock, so spawns are serialised.
    #[allow(clippy::too_many_arguments)]
    async fn spawn_locked(
        &self,
        active: &mut HashMap<InstanceKey, ActiveScraper>,
        primary: &str,
        scraper_type: &str,
        subreddits: &[String],
        credentials: &RedditCredentials,
        posts_limit: u32,
        interval_secs: u64,
        comment_batch: u32,
        sorting_methods: &[String],
    ) -> Result<()> {
        let name = handle_name(&self.config.process.handle_prefix, scraper_type, subreddits);

        // Tear down any stale process under the same handle.
        if let Some(existing) = active.get_mut(&key_of(primary, scraper_type)) {
            if let Some(handle) = existing.handle.as_mut() {
                handle.stop(self.config.process.stop_grace).await.ok();
            }
        }

        let env = self.worker_env(
            subreddits,
            scraper_type,
            credentials,
            posts_limit,
            interval_secs,
            comment_batch,
            sorting_methods,
            &name,
        );

        match WorkerHandle::spawn(&self.config.process, &name, &env).await {
            Ok(handle) => {
                info!(
                    handle = %name,
                    pid = ?handle.pid(),
                    subreddits = subreddits.len(),
                    "worker started"
                );
                scrapers::update_status(
                    &self.pool,
                    primary,
                    scraper_type,
                    ScraperStatus::Running,
                    Some(&name),
                    None,
                    false,
                )
                .await?;
                active.insert(
                    key_of(primary, scraper_type),
                    ActiveScraper {
                        handle: Some(handle),
                        credentials: credentials.masked(),
                        subreddits: subreddits.to_vec(),
                        status: ScraperStatus::Running,
                        last_error: None,
                    },
                );
                Ok(())
            }
            Err(e) => {
                let message = format!("failed to start worker: {:#}", e);
                error!(handle = %name, error = %message, "spawn failed");
                scrapers::update_status(
                    &self.pool,
                    primary,
                    scraper_type,
                    ScraperStatus::Error,
                    None,
                    Some(&message),
                    false,
                )
                .await?;
                if let Some(entry) = active.get_mut(&key_of(primary, scraper_type)) {
                    entry.status = ScraperStatus::Error;
                    entry.last_error = Some(message.clone());
                    entry.handle = None;
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn worker_env(
        &self,
        subreddits: &[String],
        scraper_type: &str,
        credentials: &RedditCredentials,
        posts_limit: u32,
        interval_secs: u64,
        comment_batch: u32,
        sorting_methods: &[String],
        handle: &str,
    ) -> Vec<(String, String)> {
        vec![
            ("WORKER_SUBREDDITS".into(), subreddits.join(",")),
            ("WORKER_SCRAPER_TYPE".into(), scraper_type.to_string()),
            ("WORKER_POSTS_LIMIT".into(), posts_limit.to_string()),
            ("WORKER_INTERVAL_SECS".into(), interval_secs.to_string()),
            ("WORKER_COMMENT_BATCH".into(), comment_batch.to_string()),
            ("WORKER_SORTING_METHODS".into(), sorting_methods.join(",")),
            ("WORKER_HANDLE".into(), handle.to_string()),
            ("R_CLIENT_ID".into(), credentials.client_id.clone()),
            ("R_CLIENT_SECRET".into(), credentials.client_secret.clone()),
            ("R_USERNAME".into(), credentials.username.clone()),
            ("R_PASSWORD".into(), credentials.password.clone()),
            ("R_USER_AGENT".into(), credentials.user_agent.clone()),
            ("DATABASE_URL".into(), self.config.database.url.clone()),
            (
                "LOG_FORMAT".into(),
                match self.config.observability.log_format {
                    subfleet_core::config::LogFormat::Json => "json".into(),
                    subfleet_core::config::LogFormat::Pretty => "pretty".into(),
                },
            ),
        ]
    }

    /// Stop a running instance: terminate the handle, mark `stopped`.
    pub async fn stop_scraper(&self, subreddit: &str, scraper_type: &str) -> Result<bool> {
        let mut active = self.active.lock().await;
        let Some(entry) = active.get_mut(&key_of(subreddit, scraper_type)) else {
            return Ok(false);
        };

        if let Some(handle) = entry.handle.as_mut() {
            handle.stop(self.config.process.stop_grace).await?;
        }
        entry.handle = None;
        entry.status = ScraperStatus::Stopped;

        scrapers::update_status(
            &self.pool,
            subreddit,
            scraper_type,
            ScraperStatus::Stopped,
            None,
            None,
            false,
        )
        .await?;

        info!(subreddit, scraper_type, "scraper stopped");
        Ok(true)
    }

    /// Tear down and respawn from the stored row.
    pub async fn restart_scraper(&self, subreddit: &str, scraper_type: &str) -> Result<()> {
        let instance = scrapers::get_instance(&self.pool, subreddit, scraper_type)
            .await?
            .with_context(|| format!("no instance for r/{} ({})", subreddit, scraper_type))?;

        let credentials =
            accounts::get_account(&self.pool, &self.cipher, &instance.account_name)
                .await?
                .with_context(|| format!("unknown account '{}'", instance.account_name))?;

        scrapers::update_status(
            &self.pool,
            subreddit,
            scraper_type,
            ScraperStatus::Restarting,
            None,
            None,
            false,
        )
        .await?;

        let run = instance.run_config();
        let mut active = self.active.lock().await;
        self.spawn_locked(
            &mut active,
            subreddit,
            scraper_type,
            &instance.subreddits,
            &credentials,
            run.posts_limit,
            run.interval,
            run.comment_batch,
            &run.sorting_methods,
        )
        .await
    }

    /// Remove: teardown plus control-row deletion.
    pub async fn remove_scraper(&self, subreddit: &str, scraper_type: &str) -> Result<bool> {
        {
            let mut active = self.active.lock().await;
            if let Some(mut entry) = active.remove(&key_of(subreddit, scraper_type)) {
                if let Some(handle) = entry.handle.as_mut() {
                    handle.stop(self.config.process.stop_grace).await.ok();
                }
            }
        }
        scrapers::delete_instance(&self.pool, subreddit, scraper_type).await
    }

    pub async fn set_auto_restart(
        &self,
        subreddit: &str,
        scraper_type: &str,
        enabled: bool,
    ) -> Result<bool> {
        scrapers::set_auto_restart(&self.pool, subreddit, scraper_type, enabled).await
    }

    /// Tail one instance's worker log.
    pub async fn tail_logs(
        &self,
        subreddit: &str,
        scraper_type: &str,
        lines: usize,
    ) -> Result<Option<String>> {
        let active = self.active.lock().await;
        match active
            .get(&key_of(subreddit, scraper_type))
            .and_then(|e| e.handle.as_ref())
        {
            Some(handle) => Ok(Some(handle.tail_logs(lines).await?)),
            None => Ok(None),
        }
    }

    /// One liveness pass: dead running handles become `failed` and are
    /// respawned after the restart delay; cooled-down stopped/failed
    /// instances with auto_restart come back up.
    pub async fn liveness_pass(&self) -> Result<()> {
        let running = scrapers::list_by_statuses_auto_restart(
            &self.pool,
            &["running".to_string()],
        )
        .await?;

        for instance in running {
            let alive = {
                let mut active = self.active.lock().await;
                active
                    .get_mut(&key_of(&instance.subreddit, &instance.scraper_type))
                    .and_then(|e| e.handle.as_mut())
                    .map(|h| h.is_alive())
                    .unwrap_or(false)
            };

            if alive {
                continue;
            }

            warn!(
                subreddit = %instance.subreddit,
                scraper_type = %instance.scraper_type,
                "worker process died unexpectedly"
            );
            scrapers::update_status(
                &self.pool,
                &instance.subreddit,
                &instance.scraper_type,
                ScraperStatus::Failed,
                None,
                Some("Container stopped unexpectedly"),
                true,
            )
            .await?;

            tokio::time::sleep(self.config.monitoring.restart_delay).await;
            if let Err(e) = self
                .restart_scraper(&instance.subreddit, &instance.scraper_type)
                .await
            {
                error!(
                    subreddit = %instance.subreddit,
                    error = %format!("{:#}", e),
                    "respawn after failure did not succeed"
                );
            }
        }

        let idle = scrapers::list_by_statuses_auto_restart(
            &self.pool,
            &["stopped".to_string(), "failed".to_string()],
        )
        .await?;

        let now = Utc::now();
        for instance in idle {
            if !cooldown_elapsed(instance.last_updated, now, self.config.monitoring.restart_cooldown)
            {
                continue;
            }

            info!(
                subreddit = %instance.subreddit,
                scraper_type = %instance.scraper_type,
                "auto-restarting idle scraper after cooldown"
            );
            if let Err(e) = self
                .restart_scraper(&instance.subreddit, &instance.scraper_type)
                .await
            {
                error!(
                    subreddit = %instance.subreddit,
                    error = %format!("{:#}", e),
                    "auto-restart failed"
                );
            }
        }

        Ok(())
    }

    /// The monitor loop: liveness checks on a timer plus the usage
    /// retention purge roughly once an hour. Errors log and the loop
    /// sleeps on; it never propagates upward.
    pub async fn run_monitor_loop(&self) {
        let check_interval = self.config.monitoring.check_interval;
        let purge_every =
            (3600 / check_interval.as_secs().max(1)).max(1);
        let mut ticks = 0u64;

        loop {
            if let Err(e) = self.liveness_pass().await {
                error!(error = %format!("{:#}", e), "liveness pass failed");
                tokio::time::sleep(Duration::from_secs(60)).await;
                continue;
            }

            ticks += 1;
            if ticks % purge_every == 0 {
                match usage::purge_expired(&self.pool, self.config.monitoring.usage_retention_days)
                    .await
                {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "expired api_usage rows removed"),
                    Err(e) => warn!(error = %e, "usage purge failed"),
                }
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Graceful teardown of every live handle; used on supervisor exit.
    pub async fn stop_all(&self) {
        let mut active = self.active.lock().await;
        for ((subreddit, scraper_type), entry) in active.iter_mut() {
            if let Some(handle) = entry.handle.as_mut() {
                info!(subreddit = %subreddit, scraper_type = %scraper_type, "stopping worker");
                handle.stop(self.config.process.stop_grace).await.ok();
            }
        }
    }

    /// Status counts for health surfaces.
    pub async fn status_summary(&self) -> Result<HashMap<String, usize>> {
        let instances = scrapers::list_instances(&self.pool).await?;
        let mut summary: HashMap<String, usize> = HashMap::new();
        for instance in instances {
            *summary.entry(instance.status).or_insert(0) += 1;
        }
        Ok(summary)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.config
    }
}

/// Masked view of the instances for any external surface.
pub fn masked_view(instances: &[ScraperInstance]) -> Vec<serde_json::Value> {
    instances
        .iter()
        .map(|i| {
            serde_json::json!({
                "subreddit": i.subreddit,
                "scraper_type": i.scraper_type,
                "subreddits": i.subreddits,
                "account_name": i.account_name,
                "status": i.status,
                "container_handle": i.container_handle,
                "restart_count": i.restart_count,
                "auto_restart": i.auto_restart,
                "last_error": i.last_error,
                "metrics": i.metrics,
                "created_at": i.created_at,
                "last_updated": i.last_updated,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn cooldown_gates_restart() {
        let now = Utc::now();
        let cooldown = Duration::from_secs(30);
        assert!(!cooldown_elapsed(now - ChronoDuration::seconds(10), now, cooldown));
        assert!(!cooldown_elapsed(now - ChronoDuration::seconds(30), now, cooldown));
        assert!(cooldown_elapsed(now - ChronoDuration::seconds(31), now, cooldown));
    }

    #[test]
    fn masked_view_never_carries_secrets() {
        let instance = ScraperInstance {
            subreddit: "rust".to_string(),
            scraper_type: "posts".to_string(),
            subreddits: vec!["rust".to_string()],
            account_name: "main".to_string(),
            posts_limit: 1000,
            interval_secs: 300,
            comment_batch: 20,
            sorting_methods: vec!["new".to_string()],
            auto_restart: true,
            status: "running".to_string(),
            container_handle: Some("subfleet-posts-rust".to_string()),
            restart_count: 0,
            last_error: None,
            metrics: serde_json::json!({}),
            pending_scrape: vec![],
            scrape_failures: serde_json::json!({}),
            created_at: Utc::now(),
            last_updated: Utc::now(),
        };

        let view = masked_view(&[instance]);
        let rendered = serde_json::to_string(&view).unwrap();
        assert!(!rendered.contains("client_secret"));
        assert!(!rendered.contains("password"));
        assert!(rendered.contains("subfleet-posts-rust"));
    }
}

//! Worker sub-process handles.
//!
//! Each scraper instance runs as an isolated child process under a
//! deterministic handle name. Stdout and stderr land in a per-handle log
//! file; a stop sends a cooperative signal first and escalates to a hard
//! kill after the grace period.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use subfleet_core::config::ProcessConfig;

/// Deterministic handle name incorporating the primary subreddit and
/// scraper type; multi-subreddit instances embed their size.
pub fn handle_name(prefix: &str, scraper_type: &str, subreddits: &[String]) -> String {
    if subreddits.len() > 1 {
        let head: String = subreddits[0].chars().take(10).collect();
        format!(
            "{}-{}-multi-{}subs-{}",
            prefix,
            scraper_type,
            subreddits.len(),
            head
        )
    } else {
        format!(
            "{}-{}-{}",
            prefix,
            scraper_type,
            subreddits.first().map(String::as_str).unwrap_or("none")
        )
    }
}

pub struct WorkerHandle {
    pub name: String,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    child: Child,
}

impl WorkerHandle {
    /// Spawn the worker binary with the given environment, redirecting
    /// output to `<logs_dir>/<name>.log`.
    pub async fn spawn(
        config: &ProcessConfig,
        name: &str,
        env: &[(String, String)],
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.logs_dir)
            .await
            .with_context(|| format!("failed to create logs dir {}", config.logs_dir))?;

        let log_path = PathBuf::from(&config.logs_dir).join(format!("{}.log", name));
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;
        let stderr_file = log_file.try_clone().context("failed to clone log handle")?;

        let mut command = Command::new(&config.worker_binary);
        command
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(false);

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker binary {}", config.worker_binary))?;

        debug!(handle = %name, pid = child.id(), "worker process spawned");

        Ok(Self {
            name: name.to_string(),
            log_path,
            started_at: Utc::now(),
            child,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Probe liveness without blocking.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Cooperative stop: SIGTERM, wait out the grace period, then kill.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            // Cooperative signal; the worker finishes its current
            // persistence write and exits.
            let term = std::process::Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status();
            if let Err(e) = term {
                warn!(handle = %self.name, error = %e, "failed to deliver SIGTERM");
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                debug!(handle = %self.name, status = ?status.ok(), "worker exited");
            }
            Err(_) => {
                warn!(handle = %self.name, "grace period expired, killing worker");
                self.child.kill().await.ok();
            }
        }

        Ok(())
    }

    /// Last `lines` lines of the handle's log file.
    pub async fn tail_logs(&self, lines: usize) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.log_path)
            .await
            .unwrap_or_default();
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_subreddit_handle_is_stable() {
        assert_eq!(
            handle_name("subfleet", "posts", &["wallstreetbets".to_string()]),
            "subfleet-posts-wallstreetbets"
        );
        assert_eq!(
            handle_name("subfleet", "comments", &["rust".to_string()]),
            "subfleet-comments-rust"
        );
    }

    #[test]
    fn multi_subreddit_handle_embeds_count() {
        let subs: Vec<String> = ["stocksandtrading", "investing", "options"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            handle_name("subfleet", "posts", &subs),
            "subfleet-posts-multi-3subs-stocksandt"
        );
    }
}

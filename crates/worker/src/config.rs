//! Worker run parameters.
//!
//! The supervisor passes everything through the environment at spawn:
//! credentials, targets, run parameters, and the stable handle name.

use anyhow::{bail, Context, Result};
use std::env;

use subfleet_core::config::ScraperDefaults;
use subfleet_core::models::{RedditCredentials, ScraperType, SortMethod};

#[derive(Debug, Clone)]
pub struct WorkerParams {
    /// Primary subreddit; identifies the scraper row
    pub primary: String,
    pub scraper_type: ScraperType,
    pub subreddits: Vec<String>,
    pub credentials: RedditCredentials,
    pub posts_limit: u32,
    pub scrape_interval_secs: u64,
    pub comment_batch: u32,
    pub sorting_methods: Vec<SortMethod>,
    pub handle: String,
}

impl WorkerParams {
    pub fn from_env(defaults: &ScraperDefaults) -> Result<Self> {
        let subreddits: Vec<String> = env::var("WORKER_SUBREDDITS")
            .context("WORKER_SUBREDDITS is required")?
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if subreddits.is_empty() {
            bail!("WORKER_SUBREDDITS must name at least one subreddit");
        }
        if subreddits.len() > defaults.max_subreddits_per_instance {
            bail!(
                "WORKER_SUBREDDITS lists {} subreddits, cap is {}",
                subreddits.len(),
                defaults.max_subreddits_per_instance
            );
        }

        let scraper_type_raw =
            env::var("WORKER_SCRAPER_TYPE").unwrap_or_else(|_| "posts".to_string());
        let scraper_type = ScraperType::parse(&scraper_type_raw)
            .with_context(|| format!("unknown scraper type '{}'", scraper_type_raw))?;

        let credentials = RedditCredentials {
            client_id: env::var("R_CLIENT_ID").context("R_CLIENT_ID is required")?,
            client_secret: env::var("R_CLIENT_SECRET").context("R_CLIENT_SECRET is required")?,
            username: env::var("R_USERNAME").context("R_USERNAME is required")?,
            password: env::var("R_PASSWORD").context("R_PASSWORD is required")?,
            user_agent: env::var("R_USER_AGENT").context("R_USER_AGENT is required")?,
        };

        let sorting_methods = parse_sorting_methods(
            &env::var("WORKER_SORTING_METHODS")
                .unwrap_or_else(|_| defaults.sorting_methods.join(",")),
        )?;

        let primary = subreddits[0].clone();
        let handle = env::var("WORKER_HANDLE")
            .unwrap_or_else(|_| format!("subfleet-{}-{}", scraper_type.as_str(), primary));

        Ok(Self {
            primary,
            scraper_type,
            subreddits,
            credentials,
            posts_limit: env::var("WORKER_POSTS_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.posts_limit),
            scrape_interval_secs: env::var("WORKER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scrape_interval.as_secs()),
            comment_batch: env::var("WORKER_COMMENT_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.comment_batch),
            sorting_methods,
            handle,
        })
    }
}

fn parse_sorting_methods(raw: &str) -> Result<Vec<SortMethod>> {
    let mut methods = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let method = SortMethod::parse(part)
            .with_context(|| format!("unknown sorting method '{}'", part))?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    if methods.is_empty() {
        bail!("no sorting methods configured");
    }
    Ok(methods)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorting_methods_parse_in_order_without_duplicates() {
        let methods = parse_sorting_methods("new, hot ,rising,new").unwrap();
        assert_eq!(
            methods,
            vec![SortMethod::New, SortMethod::Hot, SortMethod::Rising]
        );
    }

    #[test]
    fn unknown_sorting_method_is_rejected() {
        assert!(parse_sorting_methods("new,best").is_err());
        assert!(parse_sorting_methods("").is_err());
    }
}

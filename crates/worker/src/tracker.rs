//! Logical API call accounting for one worker cycle.
//!
//! Logical counts undercount reality (the client issues hidden
//! pagination and token requests), so the usage record carries both this
//! tracker's numbers and the transport's authoritative counters, with
//! the ratio between them.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Timelike, Utc};

use subfleet_core::models::{ApiUsageRecord, RateLimitSnapshot};
use subfleet_reddit::transport::CycleStats;

/// Logical call categories.
pub mod call_types {
    pub const POSTS_FETCH: &str = "posts_fetch";
    pub const COMMENTS_FETCH: &str = "comments_fetch";
    pub const COMMENTS_EXPAND: &str = "comments_expand";
    pub const METADATA_FETCH: &str = "metadata_fetch";
    pub const AUTH_CHECK: &str = "auth_check";
}

#[derive(Debug)]
pub struct CallTracker {
    subreddit: String,
    scraper_type: String,
    handle: String,
    cycle_started: Instant,
    calls: HashMap<&'static str, i64>,
    response_times_ms: Vec<f64>,
    errors: i64,
    total_calls: i64,
}

impl CallTracker {
    pub fn new(subreddit: &str, scraper_type: &str, handle: &str) -> Self {
        Self {
            subreddit: subreddit.to_string(),
            scraper_type: scraper_type.to_string(),
            handle: handle.to_string(),
            cycle_started: Instant::now(),
            calls: HashMap::new(),
            response_times_ms: Vec::new(),
            errors: 0,
            total_calls: 0,
        }
    }

    pub fn track(&mut self, call_type: &'static str, elapsed_ms: f64, success: bool) {
        *self.calls.entry(call_type).or_insert(0) += 1;
        self.total_calls += 1;
        if elapsed_ms > 0.0 {
            self.response_times_ms.push(elapsed_ms);
        }
        if !success {
            self.errors += 1;
        }
    }

    pub fn total_calls(&self) -> i64 {
        self.total_calls
    }

    fn avg_response_time_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            return 0.0;
        }
        self.response_times_ms.iter().sum::<f64>() / self.response_times_ms.len() as f64
    }

    /// Build the usage record for this cycle and reset for the next one.
    pub fn flush(
        &mut self,
        http: CycleStats,
        rate_limit: RateLimitSnapshot,
        now: DateTime<Utc>,
    ) -> ApiUsageRecord {
        let record = ApiUsageRecord {
            subreddit: self.subreddit.clone(),
            scraper_type: self.scraper_type.clone(),
            container_handle: self.handle.clone(),
            timestamp: now,
            minute_bucket: truncate_to_minute(now),
            hour_bucket: truncate_to_hour(now),
            day_bucket: truncate_to_day(now),
            calls: serde_json::to_value(&self.calls).unwrap_or_default(),
            total_calls: self.total_calls,
            avg_response_time_ms: self.avg_response_time_ms(),
            errors: self.errors,
            cycle_duration_seconds: self.cycle_started.elapsed().as_secs_f64(),
            rate_limit: Some(rate_limit),
            actual_http_requests: http.cycle_requests as i64,
            estimated_cost_usd: http.cycle_cost_usd,
            accuracy_ratio: accuracy_ratio(self.total_calls, http.cycle_requests as i64),
        };

        self.cycle_started = Instant::now();
        self.calls.clear();
        self.response_times_ms.clear();
        self.errors = 0;
        self.total_calls = 0;

        record
    }
}

/// logical / actual, 1.0 when nothing was counted at the transport.
pub fn accuracy_ratio(logical: i64, actual: i64) -> f64 {
    if actual > 0 {
        logical as f64 / actual as f64
    } else {
        1.0
    }
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(ts).with_minute(0).unwrap_or(ts)
}

fn truncate_to_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_hour(ts)
        .with_hour(0)
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_resets_cycle_state() {
        let mut tracker = CallTracker::new("rust", "posts", "subfleet-posts-rust");
        tracker.track(call_types::POSTS_FETCH, 120.0, true);
        tracker.track(call_types::POSTS_FETCH, 80.0, true);
        tracker.track(call_types::COMMENTS_FETCH, 200.0, false);

        let record = tracker.flush(
            CycleStats {
                cycle_requests: 12,
                cycle_cost_usd: 12.0 * 0.00024,
            },
            RateLimitSnapshot::default(),
            Utc::now(),
        );

        assert_eq!(record.total_calls, 3);
        assert_eq!(record.errors, 1);
        assert_eq!(record.actual_http_requests, 12);
        assert!((record.avg_response_time_ms - (120.0 + 80.0 + 200.0) / 3.0).abs() < 1e-9);
        assert!((record.estimated_cost_usd - 12.0 * 0.00024).abs() < 1e-12);
        assert!((record.accuracy_ratio - 0.25).abs() < 1e-9);

        assert_eq!(tracker.total_calls(), 0);
    }

    #[test]
    fn accuracy_ratio_handles_zero_actual() {
        assert_eq!(accuracy_ratio(5, 0), 1.0);
        assert!((accuracy_ratio(3, 4) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn buckets_truncate_cleanly() {
        let ts = "2026-08-01T13:45:31Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            truncate_to_minute(ts),
            "2026-08-01T13:45:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            truncate_to_hour(ts),
            "2026-08-01T13:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            truncate_to_day(ts),
            "2026-08-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}

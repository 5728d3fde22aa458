//! Counting HTTP transport.
//!
//! The authoritative request counter lives here, at the transport, not
//! at the call site: the client issues hidden pagination and token
//! refresh requests that logical call counting would miss. Each request
//! increments a lifetime and a per-cycle counter, is timed, and lands in
//! a bounded in-memory ring with its query string stripped.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use subfleet_core::models::RateLimitSnapshot;

use crate::RedditError;

/// Reddit API pricing: 0.24 USD per 1000 requests.
pub const COST_PER_REQUEST_USD: f64 = 0.00024;

const MAX_REQUEST_LOG: usize = 10_000;

/// One sanitized entry in the request ring.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Path only; query strings may carry tokens
    pub url: String,
    pub status: Option<u16>,
    pub elapsed_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct CounterState {
    total_requests: u64,
    cycle_requests: u64,
    total_response_time_ms: f64,
    error_count: u64,
    log: VecDeque<RequestLogEntry>,
}

/// Cycle snapshot returned by [`CountingTransport::reset_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStats {
    pub cycle_requests: u64,
    pub cycle_cost_usd: f64,
}

/// Aggregate transport statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TransportStats {
    pub total_requests: u64,
    pub cycle_requests: u64,
    pub total_cost_usd: f64,
    pub cycle_cost_usd: f64,
    pub avg_response_time_ms: f64,
    pub error_count: u64,
    pub error_rate: f64,
}

pub fn cost_for_requests(requests: u64) -> f64 {
    requests as f64 * COST_PER_REQUEST_USD
}

pub struct CountingTransport {
    client: reqwest::Client,
    state: Mutex<CounterState>,
    rate_limit: Mutex<RateLimitSnapshot>,
}

impl CountingTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, RedditError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            state: Mutex::new(CounterState::default()),
            rate_limit: Mutex::new(RateLimitSnapshot::default()),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request, counting and timing it regardless of outcome.
    pub async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RedditError> {
        let (method, url) = request
            .try_clone()
            .and_then(|r| r.build().ok())
            .map(|r| (r.method().to_string(), sanitize_url(r.url().as_str())))
            .unwrap_or_else(|| ("?".to_string(), String::new()));

        let started = Instant::now();
        let outcome = request.send().await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, error) = match &outcome {
            Ok(response) => (Some(response.status().as_u16()), None),
            Err(e) => (None, Some(e.to_string())),
        };

        {
            let mut state = self.state.lock().expect("transport counter lock");
            state.total_requests += 1;
            state.cycle_requests += 1;
            state.total_response_time_ms += elapsed_ms;
            if error.is_some() {
                state.error_count += 1;
            }
            if state.log.len() >= MAX_REQUEST_LOG {
                state.log.pop_front();
            }
            state.log.push_back(RequestLogEntry {
                timestamp: Utc::now(),
                method,
                url,
                status,
                elapsed_ms,
                error: error.clone(),
            });
        }

        let response = outcome?;
        self.capture_rate_limit(&response);
        Ok(response)
    }

    fn capture_rate_limit(&self, response: &reqwest::Response) {
        let header_f64 = |name: &str| -> Option<f64> {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };

        let remaining = header_f64("x-ratelimit-remaining");
        let used = header_f64("x-ratelimit-used");
        let reset = header_f64("x-ratelimit-reset");

        if remaining.is_some() || used.is_some() || reset.is_some() {
            let mut snapshot = self.rate_limit.lock().expect("rate limit lock");
            snapshot.remaining = remaining.or(snapshot.remaining);
            snapshot.used = used.or(snapshot.used);
            snapshot.reset_in_seconds = reset.or(snapshot.reset_in_seconds);
        }
    }

    /// Latest rate-limit headers seen on any response.
    pub fn rate_limit_snapshot(&self) -> RateLimitSnapshot {
        self.rate_limit.lock().expect("rate limit lock").clone()
    }

    pub fn total_requests(&self) -> u64 {
        self.state.lock().expect("transport counter lock").total_requests
    }

    pub fn cycle_requests(&self) -> u64 {
        self.state.lock().expect("transport counter lock").cycle_requests
    }

    pub fn stats(&self) -> TransportStats {
        let state = self.state.lock().expect("transport counter lock");
        let avg = if state.total_requests > 0 {
            state.total_response_time_ms / state.total_requests as f64
        } else {
            0.0
        };
        let error_rate = if state.total_requests > 0 {
            state.error_count as f64 / state.total_requests as f64
        } else {
            0.0
        };
        TransportStats {
            total_requests: state.total_requests,
            cycle_requests: state.cycle_requests,
            total_cost_usd: cost_for_requests(state.total_requests),
            cycle_cost_usd: cost_for_requests(state.cycle_requests),
            avg_response_time_ms: avg,
            error_count: state.error_count,
            error_rate,
        }
    }

    pub fn recent_requests(&self, limit: usize) -> Vec<RequestLogEntry> {
        let state = self.state.lock().expect("transport counter lock");
        state
            .log
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Return the cycle snapshot and zero the per-cycle counters.
    pub fn reset_cycle(&self) -> CycleStats {
        let mut state = self.state.lock().expect("transport counter lock");
        let stats = CycleStats {
            cycle_requests: state.cycle_requests,
            cycle_cost_usd: cost_for_requests(state.cycle_requests),
        };
        state.cycle_requests = 0;
        state.log.clear();
        stats
    }

    /// Full reset; only on worker restart.
    pub fn reset_all(&self) -> TransportStats {
        let stats = self.stats();
        let mut state = self.state.lock().expect("transport counter lock");
        *state = CounterState::default();
        stats
    }
}

fn sanitize_url(url: &str) -> String {
    match url.split_once('?') {
        Some((path, _)) => path.to_string(),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_matches_published_rate() {
        assert!((cost_for_requests(1000) - 0.24).abs() < 1e-9);
        assert!((cost_for_requests(0)).abs() < 1e-12);
        assert!((cost_for_requests(2500) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn sanitize_strips_query_strings() {
        assert_eq!(
            sanitize_url("https://oauth.reddit.com/r/rust/new?limit=100&after=t3_x"),
            "https://oauth.reddit.com/r/rust/new"
        );
        assert_eq!(
            sanitize_url("https://oauth.reddit.com/api/v1/me"),
            "https://oauth.reddit.com/api/v1/me"
        );
    }

    #[test]
    fn cycle_reset_zeroes_only_cycle_counters() {
        let transport =
            CountingTransport::new("subfleet-test/0.1", Duration::from_secs(5)).unwrap();
        {
            let mut state = transport.state.lock().unwrap();
            state.total_requests = 7;
            state.cycle_requests = 3;
        }

        let cycle = transport.reset_cycle();
        assert_eq!(cycle.cycle_requests, 3);
        assert!((cycle.cycle_cost_usd - cost_for_requests(3)).abs() < 1e-12);

        assert_eq!(transport.cycle_requests(), 0);
        assert_eq!(transport.total_requests(), 7);
    }

    #[test]
    fn request_ring_is_bounded() {
        let transport =
            CountingTransport::new("subfleet-test/0.1", Duration::from_secs(5)).unwrap();
        {
            let mut state = transport.state.lock().unwrap();
            for i in 0..(MAX_REQUEST_LOG + 50) {
                if state.log.len() >= MAX_REQUEST_LOG {
                    state.log.pop_front();
                }
                state.log.push_back(RequestLogEntry {
                    timestamp: Utc::now(),
                    method: "GET".to_string(),
                    url: format!("/r/test/{}", i),
                    status: Some(200),
                    elapsed_ms: 1.0,
                    error: None,
                });
            }
        }
        assert_eq!(transport.state.lock().unwrap().log.len(), MAX_REQUEST_LOG);
    }
}

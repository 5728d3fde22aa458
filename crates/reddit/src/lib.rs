//! Reddit OAuth client with transport-level request accounting.
//!
//! Every outbound request flows through the counting transport so that
//! hidden pagination and retry traffic is billed accurately; the rate
//! governor reads the live rate-limit snapshot the transport maintains.

pub mod auth;
pub mod client;
pub mod governor;
pub mod models;
pub mod transport;
pub mod tree;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Reddit API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to parse Reddit response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RedditError {
    /// Transient failures worth a bounded retry inside a phase.
    pub fn is_retryable(&self) -> bool {
        match self {
            RedditError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            RedditError::Api { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            RedditError::Auth(_) | RedditError::Parse(_) => false,
        }
    }
}

impl subfleet_core::retry::Retryable for RedditError {
    fn is_retryable(&self) -> bool {
        RedditError::is_retryable(self)
    }
}

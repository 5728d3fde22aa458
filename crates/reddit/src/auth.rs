//! OAuth password-grant token management.
//!
//! One token per account; renewed ahead of expiry so long-running
//! workers never race the deadline mid-listing.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use subfleet_core::models::RedditCredentials;

use crate::transport::CountingTransport;
use crate::RedditError;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Renew this far ahead of the reported expiry.
const RENEWAL_MARGIN: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct TokenState {
    access_token: String,
    fetched_at: Instant,
    ttl: Duration,
}

impl TokenState {
    fn should_renew(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl.saturating_sub(RENEWAL_MARGIN)
    }
}

pub struct TokenManager {
    credentials: RedditCredentials,
    state: Mutex<Option<TokenState>>,
}

impl TokenManager {
    pub fn new(credentials: RedditCredentials) -> Self {
        Self {
            credentials,
            state: Mutex::new(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Current bearer token, fetching or renewing as needed.
    pub async fn bearer_token(
        &self,
        transport: &CountingTransport,
    ) -> Result<String, RedditError> {
        let mut state = self.state.lock().await;

        if let Some(token) = state.as_ref() {
            if !token.should_renew() {
                return Ok(token.access_token.clone());
            }
            debug!("access token near expiry, renewing");
        }

        let fetched = self.fetch_token(transport).await?;
        let access_token = fetched.access_token.clone();
        *state = Some(fetched);
        Ok(access_token)
    }

    async fn fetch_token(
        &self,
        transport: &CountingTransport,
    ) -> Result<TokenState, RedditError> {
        let form = [
            ("grant_type", "password"),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];

        let request = transport
            .http()
            .post(TOKEN_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&form);

        let response = transport.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RedditError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| RedditError::Auth(format!("bad token response: {}", e)))?;

        if body.access_token.is_empty() {
            return Err(RedditError::Auth("empty access token".to_string()));
        }

        debug!(expires_in = body.expires_in, "fetched access token");

        Ok(TokenState {
            access_token: body.access_token,
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_renewed() {
        let state = TokenState {
            access_token: "tok".to_string(),
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(3600),
        };
        assert!(!state.should_renew());
    }

    #[test]
    fn short_ttl_token_renews_immediately() {
        let state = TokenState {
            access_token: "tok".to_string(),
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(60),
        };
        // ttl below the renewal margin: always renew
        assert!(state.should_renew());
    }
}

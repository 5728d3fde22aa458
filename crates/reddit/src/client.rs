//! Authenticated client for the oauth.reddit.com JSON API.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use subfleet_core::models::{RedditCredentials, SortMethod};

use crate::auth::TokenManager;
use crate::models::{
    Identity, Listing, MoreChildrenResponse, PostData, PostRequirements, RulesResponse,
    RuleData, SubredditAbout, Thing,
};
use crate::transport::CountingTransport;
use crate::RedditError;

const API_BASE: &str = "https://oauth.reddit.com";

/// Reddit caps listing pages at 100 items.
const PAGE_SIZE: u32 = 100;

/// `/api/morechildren` accepts at most 100 ids per call.
const MORE_CHILDREN_CHUNK: usize = 100;

pub struct RedditClient {
    transport: Arc<CountingTransport>,
    auth: TokenManager,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, timeout: Duration) -> Result<Self, RedditError> {
        let transport = Arc::new(CountingTransport::new(&credentials.user_agent, timeout)?);
        Ok(Self {
            auth: TokenManager::new(credentials),
            transport,
        })
    }

    /// The counting transport; shared with the rate governor and the
    /// metrics flush.
    pub fn transport(&self) -> &Arc<CountingTransport> {
        &self.transport
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RedditError> {
        let token = self.auth.bearer_token(&self.transport).await?;

        let mut request = self
            .transport
            .http()
            .get(format!("{}{}", API_BASE, path))
            .bearer_auth(token)
            .query(&[("raw_json", "1")]);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = self.transport.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RedditError::Api { status, body });
        }

        let value = response.json::<Value>().await.map_err(RedditError::Http)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Authenticated identity; used as a startup credential check.
    pub async fn me(&self) -> Result<String, RedditError> {
        let identity: Identity = self.get_json("/api/v1/me", &[]).await?;
        Ok(identity.name)
    }

    /// Fetch up to `limit` posts from one listing, paginating as needed.
    /// `time_filter` only applies to sorts that accept one.
    pub async fn listing(
        &self,
        subreddit: &str,
        sort: SortMethod,
        time_filter: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PostData>, RedditError> {
        let path = format!("/r/{}/{}", subreddit, sort.as_str());
        let mut posts: Vec<PostData> = Vec::new();
        let mut after: Option<String> = None;

        while (posts.len() as u32) < limit {
            let page_size = PAGE_SIZE.min(limit - posts.len() as u32);
            let mut query: Vec<(&str, String)> = vec![("limit", page_size.to_string())];
            if let (Some(t), true) = (time_filter, sort.takes_time_filter()) {
                query.push(("t", t.to_string()));
            }
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page: Listing<PostData> = self.get_json(&path, &query).await?;
            let count = page.data.children.len();
            posts.extend(page.data.children.into_iter().map(|t| t.data));

            debug!(
                subreddit,
                sort = sort.as_str(),
                fetched = count,
                total = posts.len(),
                "listing page"
            );

            after = page.data.after;
            if after.is_none() || count == 0 {
                break;
            }
        }

        posts.truncate(limit as usize);
        Ok(posts)
    }

    /// The raw comment forest for a submission: the children of the
    /// comment listing, each a `t1` or `more` thing.
    pub async fn submission_comments(&self, post_id: &str) -> Result<Vec<Value>, RedditError> {
        let path = format!("/comments/{}", post_id);
        let payload: Value = self
            .get_json(&path, &[("limit", "500".to_string())])
            .await?;

        // Response shape: [post listing, comment listing]
        let children = payload
            .get(1)
            .and_then(|l| l.get("data"))
            .and_then(|d| d.get("children"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(children)
    }

    /// Expand "more comments" stubs. `limit` caps how many stub ids are
    /// resolved; `None` expands all of them.
    pub async fn more_children(
        &self,
        post_id: &str,
        ids: &[String],
        limit: Option<u32>,
    ) -> Result<Vec<Value>, RedditError> {
        let capped: &[String] = match limit {
            Some(0) => return Ok(Vec::new()),
            Some(n) => &ids[..ids.len().min(n as usize)],
            None => ids,
        };

        let mut things = Vec::new();
        for chunk in capped.chunks(MORE_CHILDREN_CHUNK) {
            let response: MoreChildrenResponse = self
                .get_json(
                    "/api/morechildren",
                    &[
                        ("api_type", "json".to_string()),
                        ("link_id", format!("t3_{}", post_id)),
                        ("children", chunk.join(",")),
                    ],
                )
                .await?;
            things.extend(response.json.data.things);
        }

        Ok(things)
    }

    pub async fn subreddit_about(&self, subreddit: &str) -> Result<SubredditAbout, RedditError> {
        let thing: Thing<SubredditAbout> = self
            .get_json(&format!("/r/{}/about", subreddit), &[])
            .await?;
        Ok(thing.data)
    }

    pub async fn subreddit_rules(&self, subreddit: &str) -> Result<Vec<RuleData>, RedditError> {
        let response: RulesResponse = self
            .get_json(&format!("/r/{}/about/rules", subreddit), &[])
            .await?;
        Ok(response.rules)
    }

    /// Post guidelines, when the community exposes them. Communities
    /// without requirements respond with an error; that is not a failure.
    pub async fn post_guidelines(&self, subreddit: &str) -> Result<Option<String>, RedditError> {
        match self
            .get_json::<PostRequirements>(&format!("/api/v1/{}/post_requirements", subreddit), &[])
            .await
        {
            Ok(requirements) => Ok(requirements.guidelines_text),
            Err(RedditError::Api { status, .. })
                if status == reqwest::StatusCode::FORBIDDEN
                    || status == reqwest::StatusCode::NOT_FOUND =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

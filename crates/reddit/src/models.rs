//! Wire types for the JSON API at oauth.reddit.com.
//!
//! Fields default aggressively: Reddit omits or nulls attributes freely
//! and a missing flag must never fail a whole listing.

use serde::Deserialize;

/// Standard listing envelope: `{"kind": "Listing", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
    #[serde(default)]
    pub after: Option<String>,
}

/// A kinded thing: `t1` comment, `t3` submission, `more` stub.
#[derive(Debug, Clone, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostData {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub distinguished: Option<String>,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub is_self: bool,
}

impl PostData {
    pub fn author_name(&self) -> String {
        self.author
            .clone()
            .unwrap_or_else(|| "[deleted]".to_string())
    }

    pub fn reddit_url(&self) -> String {
        format!("https://reddit.com{}", self.permalink)
    }
}

/// `/r/{sub}/about` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SubredditAbout {
    pub display_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub public_description: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub subscribers: Option<i64>,
    #[serde(default)]
    pub active_user_count: Option<i64>,
    #[serde(default)]
    pub over18: bool,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub submission_type: Option<String>,
    #[serde(default)]
    pub advertiser_category: Option<String>,
    #[serde(default)]
    pub quarantine: bool,
    #[serde(default)]
    pub icon_img: Option<String>,
    #[serde(default)]
    pub community_icon: Option<String>,
}

/// `/r/{sub}/about/rules` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesResponse {
    #[serde(default = "Vec::new")]
    pub rules: Vec<RuleData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleData {
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// `/api/v1/{sub}/post_requirements` payload (post guidelines).
#[derive(Debug, Clone, Deserialize)]
pub struct PostRequirements {
    #[serde(default)]
    pub guidelines_text: Option<String>,
}

/// `/api/v1/me` payload; only the name is needed.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    pub name: String,
}

/// `/api/morechildren` response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct MoreChildrenResponse {
    pub json: MoreChildrenJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoreChildrenJson {
    pub data: MoreChildrenData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoreChildrenData {
    #[serde(default = "Vec::new")]
    pub things: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parses_with_missing_optionals() {
        let raw = serde_json::json!({
            "kind": "Listing",
            "data": {
                "children": [
                    {"kind": "t3", "data": {"id": "abc1", "title": "hello"}}
                ]
            }
        });
        let listing: Listing<PostData> = serde_json::from_value(raw).unwrap();
        assert_eq!(listing.data.children.len(), 1);
        let post = &listing.data.children[0].data;
        assert_eq!(post.id, "abc1");
        assert_eq!(post.author_name(), "[deleted]");
        assert_eq!(post.score, 0);
        assert!(listing.data.after.is_none());
    }

    #[test]
    fn reddit_url_prefixes_permalink() {
        let post = PostData {
            id: "x".to_string(),
            permalink: "/r/rust/comments/x/title/".to_string(),
            title: String::new(),
            selftext: String::new(),
            author: Some("someone".to_string()),
            subreddit: "rust".to_string(),
            url: String::new(),
            created_utc: 0.0,
            score: 0,
            num_comments: 0,
            upvote_ratio: None,
            distinguished: None,
            stickied: false,
            over_18: false,
            spoiler: false,
            locked: false,
            is_self: true,
        };
        assert_eq!(post.reddit_url(), "https://reddit.com/r/rust/comments/x/title/");
    }
}

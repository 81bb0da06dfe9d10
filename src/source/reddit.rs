//! Reddit listing client (application-only OAuth).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::ratelimit::{headers::parse_quota_hints, RateLimiter};
use crate::source::{Batch, Item, ItemSource, SourceError};

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
pub const DEFAULT_USER_AGENT: &str = "subreddit-stats/0.1";

const LISTING_LIMIT: &str = "100";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Refresh the token this long before Reddit says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);
/// Token lifetimes beyond a week are treated as a week.
const MAX_TOKEN_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditSettings {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub auth_url: String,
    pub api_base: String,
}

impl RedditSettings {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_SLACK < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    created_utc: f64,
}

impl Listing {
    fn into_items(self) -> Vec<Item> {
        self.data
            .children
            .into_iter()
            .map(|c| Item {
                id: c.data.id,
                title: c.data.title,
                author: c.data.author,
                score: c.data.ups,
                created_at: DateTime::<Utc>::from_timestamp(c.data.created_utc as i64, 0)
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// Fetches `/r/{channel}/new` through a shared [`RateLimiter`].
pub struct RedditClient {
    settings: RedditSettings,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(settings: RedditSettings, limiter: Arc<RateLimiter>) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(SourceError::Transport)?;
        Ok(Self {
            settings,
            http,
            limiter,
            token: Mutex::new(None),
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Request a fresh application token, replacing any cached one.
    pub async fn authenticate(&self) -> Result<(), SourceError> {
        let mut slot = self.token.lock().await;
        *slot = Some(self.request_token().await?);
        Ok(())
    }

    async fn bearer(&self) -> Result<String, SourceError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }
        tracing::debug!("access token missing or expiring, refreshing");
        let token = self.request_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken, SourceError> {
        let resp = self
            .http
            .post(&self.settings.auth_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .query(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(SourceError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: TokenResponse = resp.json().await.map_err(SourceError::Decode)?;
        if body.access_token.is_empty() {
            return Err(SourceError::Auth("token endpoint returned an empty token".into()));
        }

        tracing::info!(expires_in = body.expires_in, "obtained reddit access token");
        let now = Instant::now();
        let lifetime = Duration::from_secs(body.expires_in.min(MAX_TOKEN_LIFETIME_SECS));
        Ok(AccessToken {
            value: body.access_token,
            expires_at: now.checked_add(lifetime).unwrap_or(now),
        })
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl ItemSource for RedditClient {
    async fn fetch(&self, channel: &str) -> Result<Batch, SourceError> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/r/{}/new.json",
            self.settings.api_base.trim_end_matches('/'),
            channel
        );

        self.limiter.acquire().await;

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .query(&[("limit", LISTING_LIMIT)])
            .send()
            .await
            .map_err(SourceError::Transport)?;

        let quota = parse_quota_hints(resp.headers());
        if let Some(hints) = quota {
            self.limiter.reconcile(hints);
        }

        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                self.forget_token().await;
                return Err(SourceError::Auth(format!(
                    "listing for r/{channel} rejected the access token"
                )));
            }
            s if !s.is_success() => return Err(SourceError::Status(s.as_u16())),
            _ => {}
        }

        let listing: Listing = resp.json().await.map_err(SourceError::Decode)?;
        let items = listing.into_items();
        tracing::debug!(channel, fetched = items.len(), "fetched listing");

        Ok(Batch { items, quota })
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_json_maps_to_items() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    {"kind": "t3", "data": {"id": "abc", "title": "Hello", "author": "alice", "ups": 42, "created_utc": 1700000000.0}},
                    {"kind": "t3", "data": {"id": "def", "title": "World", "author": "bob", "ups": 7, "created_utc": 1700000100.5}}
                ]
            }
        }"#;
        let listing: Listing = serde_json::from_str(raw).unwrap();
        let items = listing.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "abc");
        assert_eq!(items[0].score, 42);
        assert_eq!(items[0].created_at.timestamp(), 1_700_000_000);
        assert_eq!(items[1].author, "bob");
    }

    #[test]
    fn empty_listing_is_fine() {
        let listing: Listing = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert!(listing.into_items().is_empty());
    }
}

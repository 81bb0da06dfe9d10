// src/source/mod.rs
pub mod reddit;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ratelimit::QuotaHints;

/// A post as observed in one fetch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub author: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of one successful fetch: the items plus whatever quota information
/// came back with them.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<Item>,
    pub quota: Option<QuotaHints>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("could not decode response: {0}")]
    Decode(#[source] reqwest::Error),
}

#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch the newest items for `channel`.
    async fn fetch(&self, channel: &str) -> Result<Batch, SourceError>;
    fn name(&self) -> &str;
}

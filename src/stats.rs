//! # Stats Aggregator
//! Per-subreddit leaderboard of posts and posters.
//!
//! Every configured channel owns its own [`ChannelState`] behind its own
//! mutex, so merging a batch for one subreddit never waits on another. The
//! channel map itself is fixed at construction and needs no lock.
//!
//! Score policy: the most recent fetch of a post overwrites its stored score
//! and title, while an author is credited only the first time a post id is
//! seen.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::source::Item;

/// Size of each channel's ranked list.
pub const TOP_K: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("channel {0:?} is not tracked")]
    UnknownChannel(String),
}

/// Outcome of merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Items in the batch, duplicates included.
    pub fetched: usize,
    /// Items whose id had never been seen in this channel.
    pub new_items: usize,
    /// Items whose id was already known, either from an earlier batch or
    /// from an earlier entry in this one. `new_items + refreshed == fetched`.
    pub refreshed: usize,
    /// Ranked list length after the merge.
    pub ranked: usize,
}

#[derive(Debug, Default)]
struct ChannelState {
    seen: HashSet<String>,
    ranked: Vec<Item>,
    authors: HashMap<String, u64>,
    ingests: u64,
    last_ingest: Option<DateTime<Utc>>,
}

impl ChannelState {
    fn merge(&mut self, items: Vec<Item>, top_k: usize) -> IngestSummary {
        let mut summary = IngestSummary {
            fetched: items.len(),
            ..IngestSummary::default()
        };

        let mut candidates: HashMap<String, Item> = self
            .ranked
            .drain(..)
            .map(|it| (it.id.clone(), it))
            .collect();

        for item in items {
            if self.seen.insert(item.id.clone()) {
                *self.authors.entry(item.author.clone()).or_insert(0) += 1;
                summary.new_items += 1;
            } else {
                summary.refreshed += 1;
            }
            candidates.insert(item.id.clone(), item);
        }

        let mut ranked: Vec<Item> = candidates.into_values().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        ranked.truncate(top_k);
        self.ranked = ranked;

        self.ingests += 1;
        self.last_ingest = Some(Utc::now());
        summary.ranked = self.ranked.len();
        summary
    }

    fn snapshot(&self, channel: &str) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: channel.to_string(),
            top_items: self.ranked.clone(),
            author_counts: self
                .authors
                .iter()
                .map(|(a, n)| (a.clone(), *n))
                .collect(),
            seen: self.seen.len(),
            ingests: self.ingests,
            last_ingest: self.last_ingest,
        }
    }
}

/// Immutable copy of one channel's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: String,
    /// Ranked items, best first.
    pub top_items: Vec<Item>,
    pub author_counts: BTreeMap<String, u64>,
    /// Distinct item ids seen so far.
    pub seen: usize,
    /// Completed merges.
    pub ingests: u64,
    pub last_ingest: Option<DateTime<Utc>>,
}

impl ChannelSnapshot {
    pub fn top_items(&self, n: usize) -> &[Item] {
        &self.top_items[..n.min(self.top_items.len())]
    }

    /// The `n` most prolific authors, ties broken alphabetically.
    pub fn top_authors(&self, n: usize) -> Vec<(&str, u64)> {
        let mut authors: Vec<(&str, u64)> = self
            .author_counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        authors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        authors.truncate(n);
        authors
    }

    pub fn is_empty(&self) -> bool {
        self.ingests == 0
    }
}

/// Immutable copy of one or more channels, in configured order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub channels: Vec<ChannelSnapshot>,
}

impl Snapshot {
    pub fn channel(&self, name: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.channel == name)
    }
}

#[derive(Debug)]
pub struct Aggregator {
    order: Vec<String>,
    channels: HashMap<String, Mutex<ChannelState>>,
    top_k: usize,
}

impl Aggregator {
    /// Track `channels` with the default ranking size.
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_top_k(channels, TOP_K)
    }

    /// Repeated names are tracked once, at their first position.
    pub fn with_top_k<I, S>(channels: I, top_k: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut order = Vec::new();
        let mut map = HashMap::new();
        for name in channels {
            let name: String = name.into();
            if map.contains_key(&name) {
                continue;
            }
            map.insert(name.clone(), Mutex::new(ChannelState::default()));
            order.push(name);
        }
        Self {
            order,
            channels: map,
            top_k,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.order
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Merge a fetched batch into `channel`.
    pub fn ingest(&self, channel: &str, items: Vec<Item>) -> Result<IngestSummary, StatsError> {
        let mut state = self.lock(channel)?;
        Ok(state.merge(items, self.top_k))
    }

    /// Deep copy of `channel`, or of every channel when `None`.
    ///
    /// Each channel is copied under its own lock; a concurrent merge is seen
    /// either entirely or not at all.
    pub fn snapshot(&self, channel: Option<&str>) -> Result<Snapshot, StatsError> {
        let channels = match channel {
            Some(name) => vec![self.lock(name)?.snapshot(name)],
            None => self
                .order
                .iter()
                .map(|name| self.lock(name).map(|s| s.snapshot(name)))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Snapshot {
            taken_at: Utc::now(),
            channels,
        })
    }

    fn lock(&self, channel: &str) -> Result<MutexGuard<'_, ChannelState>, StatsError> {
        let state = self
            .channels
            .get(channel)
            .ok_or_else(|| StatsError::UnknownChannel(channel.to_string()))?;
        Ok(state.lock().expect("channel state mutex poisoned"))
    }
}

// src/config.rs
//! Runtime configuration: optional TOML file, overridden by environment
//! variables (a `.env` file is loaded by the binary before this runs).

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ratelimit::{RateLimitConfig, DEFAULT_BUFFER, DEFAULT_LIMIT, DEFAULT_WINDOW};
use crate::scheduler::{SchedulerCfg, DEFAULT_POLL_INTERVAL, DEFAULT_REPORT_INTERVAL};
use crate::source::reddit::RedditSettings;

pub const ENV_CONFIG_PATH: &str = "TRACKER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/tracker.toml";

static CHANNEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{2,21}$").expect("channel name regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub reddit: RedditSettings,
    pub channels: Vec<String>,
    pub scheduler: SchedulerCfg,
    pub rate_limit: RateLimitConfig,
    /// Where to serve the stats API; `None` disables it.
    pub api_addr: Option<SocketAddr>,
}

/// Shape of `config/tracker.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: Option<String>,
    pub auth_url: Option<String>,
    pub api_base: Option<String>,
    pub subreddits: Option<Vec<String>>,
    pub poll_interval_secs: Option<u64>,
    pub report_interval_secs: Option<u64>,
    pub rate_limit_requests: Option<u32>,
    pub rate_limit_window_secs: Option<u64>,
    pub rate_limit_buffer: Option<f64>,
    pub api_bind_addr: Option<String>,
}

impl FileConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing tracker config")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load the file named by `$TRACKER_CONFIG_PATH`, else
    /// `config/tracker.toml` if present, else an empty config.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::from_path(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::from_path(&default);
        }
        Ok(Self::default())
    }
}

impl Config {
    /// Read the config file (if any) and the process environment.
    pub fn load() -> Result<Self> {
        let file = FileConfig::load_default()?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge `file` with values from `env`; environment wins. Empty
    /// environment values count as unset.
    pub fn resolve<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let client_id = env("REDDIT_CLIENT_ID")
            .or(file.client_id)
            .ok_or_else(|| anyhow!("missing REDDIT_CLIENT_ID"))?;
        let client_secret = env("REDDIT_CLIENT_SECRET")
            .or(file.client_secret)
            .ok_or_else(|| anyhow!("missing REDDIT_CLIENT_SECRET"))?;

        let mut reddit = RedditSettings::new(client_id, client_secret);
        if let Some(ua) = env("REDDIT_USER_AGENT").or(file.user_agent) {
            reddit.user_agent = ua;
        }
        if let Some(url) = env("REDDIT_AUTH_URL").or(file.auth_url) {
            reddit.auth_url = url;
        }
        if let Some(base) = env("REDDIT_API_BASE").or(file.api_base) {
            reddit.api_base = base;
        }

        let channels = match env("REDDIT_SUBREDDITS").or_else(|| env("REDDIT_SUBREDDIT")) {
            Some(raw) => parse_channel_list(&raw)?,
            None => clean_channels(file.subreddits.unwrap_or_default())?,
        };
        if channels.is_empty() {
            bail!("no subreddits configured (set REDDIT_SUBREDDITS)");
        }

        let poll = secs(env("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS")?
            .or(file.poll_interval_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let report = secs(env("REPORT_INTERVAL_SECS"), "REPORT_INTERVAL_SECS")?
            .or(file.report_interval_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_REPORT_INTERVAL);
        if poll.is_zero() || report.is_zero() {
            bail!("poll and report intervals must be at least one second");
        }

        let rate_limit = RateLimitConfig {
            limit: parse_var::<u32>(env("RATE_LIMIT_REQUESTS"), "RATE_LIMIT_REQUESTS")?
                .or(file.rate_limit_requests)
                .unwrap_or(DEFAULT_LIMIT),
            window: secs(env("RATE_LIMIT_WINDOW_SECS"), "RATE_LIMIT_WINDOW_SECS")?
                .or(file.rate_limit_window_secs.map(Duration::from_secs))
                .unwrap_or(DEFAULT_WINDOW),
            buffer: parse_var::<f64>(env("RATE_LIMIT_BUFFER"), "RATE_LIMIT_BUFFER")?
                .or(file.rate_limit_buffer)
                .unwrap_or(DEFAULT_BUFFER),
        };

        let api_addr = match env("API_BIND_ADDR").or(file.api_bind_addr) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid API_BIND_ADDR {raw:?}"))?,
            ),
            None => None,
        };

        Ok(Self {
            reddit,
            channels,
            scheduler: SchedulerCfg {
                poll_interval: poll,
                report_interval: report,
            },
            rate_limit,
            api_addr,
        })
    }
}

/// Split a comma-separated subreddit list.
pub fn parse_channel_list(raw: &str) -> Result<Vec<String>> {
    clean_channels(raw.split(','))
}

/// Trim, drop empties and a leading `r/`, dedup keeping first position,
/// validate names.
fn clean_channels<I, S>(items: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for it in items {
        let t = it.as_ref().trim();
        let t = t
            .strip_prefix("r/")
            .or_else(|| t.strip_prefix("/r/"))
            .unwrap_or(t);
        if t.is_empty() {
            continue;
        }
        if !CHANNEL_NAME.is_match(t) {
            bail!("invalid subreddit name {t:?}");
        }
        if !out.iter().any(|c| c.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    Ok(out)
}

fn parse_var<T>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key} {v:?}")))
        .transpose()
}

fn secs(raw: Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parse_var::<u64>(raw, key)?.map(Duration::from_secs))
}

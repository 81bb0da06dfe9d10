//! # Rate Limiter
//! Client-side pacing against a request quota of `limit` calls per `window`.
//!
//! Requests are spread evenly (one every `window / limit`) instead of bursting,
//! and the limiter stalls until the window resets once the number of requests
//! in the trailing window reaches `limit * (1 - buffer)`. The headroom left by
//! the buffer absorbs requests the server has counted but we have not yet heard
//! about.
//!
//! The server's view of the quota is authoritative: [`RateLimiter::reconcile`]
//! overwrites the local limit, remaining count and reset instant with whatever
//! the last response reported.

pub mod headers;
pub mod window;

use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::time::{sleep, sleep_until, Duration, Instant};

use self::window::RequestLog;

/// Reddit's OAuth quota: 600 requests per 10 minutes.
pub const DEFAULT_LIMIT: u32 = 600;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(600);
pub const DEFAULT_BUFFER: f64 = 0.10;

/// Static limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub limit: u32,
    /// Length of the quota window.
    pub window: Duration,
    /// Fraction of the limit held back as headroom, in `[0.0, 1.0)`.
    pub buffer: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            buffer: DEFAULT_BUFFER,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LimiterError {
    #[error("rate limit must allow at least one request per window")]
    ZeroLimit,

    #[error("rate limit window must be longer than zero")]
    ZeroWindow,

    #[error("rate limit window of {0:?} is too long")]
    WindowTooLong(Duration),

    #[error("rate limit buffer must be in [0.0, 1.0), got {0}")]
    InvalidBuffer(f64),
}

/// Quota information reported by the server alongside a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaHints {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the server's window resets, relative to when the response
    /// was received.
    pub reset_in: Option<Duration>,
}

/// Point-in-time view of the limiter, for logs and the API.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_in_secs: u64,
    pub requests_in_window: usize,
    pub threshold: usize,
}

#[derive(Debug)]
struct QuotaState {
    limit: u32,
    remaining: u32,
    reset_at: Instant,
    /// Last granted request. Outlives log resets so pacing holds across them.
    last_sent: Option<Instant>,
    log: RequestLog,
}

/// What `acquire` has to do next.
#[derive(Debug, PartialEq)]
enum Gate {
    Ready,
    Pace(Duration),
    Stall(Instant),
}

#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<QuotaState>,
    window: Duration,
    buffer: f64,
}

impl RateLimiter {
    /// Build a limiter; fails when the configuration could block forever.
    pub fn new(cfg: RateLimitConfig) -> Result<Self, LimiterError> {
        if cfg.limit == 0 {
            return Err(LimiterError::ZeroLimit);
        }
        if cfg.window.is_zero() {
            return Err(LimiterError::ZeroWindow);
        }
        if !(0.0..1.0).contains(&cfg.buffer) {
            return Err(LimiterError::InvalidBuffer(cfg.buffer));
        }

        let reset_at = Instant::now()
            .checked_add(cfg.window)
            .ok_or(LimiterError::WindowTooLong(cfg.window))?;

        Ok(Self {
            state: Mutex::new(QuotaState {
                limit: cfg.limit,
                remaining: cfg.limit,
                reset_at,
                last_sent: None,
                log: RequestLog::with_capacity(cfg.limit as usize),
            }),
            window: cfg.window,
            buffer: cfg.buffer,
        })
    }

    /// Wait until a request may be sent, then count it.
    ///
    /// The internal lock is never held while sleeping, and dropping the
    /// returned future abandons the wait.
    pub async fn acquire(&self) {
        loop {
            let gate = {
                let mut state = self.lock();
                self.gate(&mut state, Instant::now())
            };

            match gate {
                Gate::Ready => return,
                Gate::Pace(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "pacing request");
                    counter!("tracker_limiter_waits_total", "reason" => "pace").increment(1);
                    sleep(wait).await;
                }
                Gate::Stall(until) => {
                    let wait = until.saturating_duration_since(Instant::now());
                    tracing::info!(
                        wait_secs = wait.as_secs(),
                        "request quota exhausted, waiting for window reset"
                    );
                    counter!("tracker_limiter_waits_total", "reason" => "quota").increment(1);
                    // The next gate call rolls the window over, or stalls again
                    // if a reconcile moved the reset further out meanwhile.
                    sleep_until(until).await;
                }
            }
        }
    }

    /// Overwrite the local quota estimate with the server's numbers.
    pub fn reconcile(&self, hints: QuotaHints) {
        let mut state = self.lock();

        match hints.limit {
            Some(0) => tracing::warn!(
                limit = state.limit,
                "server reported a zero request limit, keeping local limit"
            ),
            Some(limit) => state.limit = limit,
            None => {}
        }
        if let Some(remaining) = hints.remaining {
            state.remaining = remaining;
        }
        if let Some(reset_in) = hints.reset_in {
            match Instant::now().checked_add(reset_in) {
                Some(reset_at) => state.reset_at = reset_at,
                None => tracing::warn!(
                    reset_in_secs = reset_in.as_secs(),
                    "server reported an unrepresentable reset time, keeping local reset"
                ),
            }
        }

        gauge!("tracker_quota_remaining").set(f64::from(state.remaining));
        tracing::debug!(
            limit = state.limit,
            remaining = state.remaining,
            "quota reconciled from server"
        );
    }

    pub fn status(&self) -> QuotaStatus {
        let mut state = self.lock();
        let now = Instant::now();
        state.log.evict_older_than(now, self.window);
        QuotaStatus {
            limit: state.limit,
            remaining: state.remaining,
            reset_in_secs: state.reset_at.saturating_duration_since(now).as_secs(),
            requests_in_window: state.log.len(),
            threshold: self.threshold(state.limit),
        }
    }

    /// Decide whether a request may go out at `now`, recording it if so.
    fn gate(&self, state: &mut QuotaState, now: Instant) -> Gate {
        if now >= state.reset_at {
            state.log.clear();
            state.remaining = state.limit;
            state.reset_at = now.checked_add(self.window).unwrap_or(now);
        }

        state.log.evict_older_than(now, self.window);

        let spacing = self.window / state.limit;
        if let Some(last) = state.last_sent {
            let since = now.saturating_duration_since(last);
            if since < spacing {
                return Gate::Pace(spacing - since);
            }
        }

        if state.remaining == 0 || state.log.len() >= self.threshold(state.limit) {
            return Gate::Stall(state.reset_at);
        }

        state.log.push(now);
        state.last_sent = Some(now);
        state.remaining -= 1;
        Gate::Ready
    }

    /// Requests allowed in one window before stalling.
    fn threshold(&self, limit: u32) -> usize {
        ((f64::from(limit) * (1.0 - self.buffer)).floor() as usize).max(1)
    }

    fn lock(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().expect("rate limiter mutex poisoned")
    }
}

// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod metrics;
pub mod ratelimit;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod stats;

// ---- Re-exports for stable public API ----
pub use crate::ratelimit::{QuotaHints, RateLimitConfig, RateLimiter};
pub use crate::source::{Batch, Item, ItemSource, SourceError};
pub use crate::stats::{Aggregator, Snapshot};

//! Text rendering of leaderboard snapshots.

use std::fmt::Write as _;

use crate::stats::{ChannelSnapshot, Snapshot};

pub const TOP_POSTS: usize = 5;
pub const TOP_AUTHORS: usize = 5;
const SEPARATOR_WIDTH: usize = 50;

/// Destination for rendered reports.
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &str);
}

/// Writes reports through `tracing` under the `report` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&self, report: &str) {
        tracing::info!(target: "report", "\n{report}");
    }
}

/// Render every channel in the snapshot, in snapshot order.
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for channel in &snapshot.channels {
        render_channel(&mut out, channel);
    }
    out
}

fn render_channel(out: &mut String, ch: &ChannelSnapshot) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "=== r/{} ===", ch.channel);

    let _ = writeln!(out, "Top Posts:");
    let posts = ch.top_items(TOP_POSTS);
    if posts.is_empty() {
        let _ = writeln!(out, "  (no posts yet)");
    }
    for (rank, item) in posts.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} by {} ({} upvotes)",
            rank + 1,
            item.title,
            item.author,
            item.score
        );
    }

    let _ = writeln!(out, "Most Active Users:");
    let authors = ch.top_authors(TOP_AUTHORS);
    if authors.is_empty() {
        let _ = writeln!(out, "  (no users yet)");
    }
    for (rank, (author, count)) in authors.iter().enumerate() {
        let noun = if *count == 1 { "post" } else { "posts" };
        let _ = writeln!(out, "{}. {} ({} {})", rank + 1, author, count, noun);
    }

    let _ = writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH));
}

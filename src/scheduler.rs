// src/scheduler.rs
use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::report::{self, ReportSink};
use crate::source::ItemSource;
use crate::stats::{Aggregator, IngestSummary};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerCfg {
    pub poll_interval: Duration,
    pub report_interval: Duration,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tracker_polls_total", "Successful polls per channel.");
        describe_counter!(
            "tracker_fetch_errors_total",
            "Failed fetches per channel."
        );
        describe_counter!(
            "tracker_items_new_total",
            "Posts seen for the first time per channel."
        );
        describe_gauge!(
            "tracker_ranked_items",
            "Length of each channel's ranked list."
        );
        describe_gauge!(
            "tracker_quota_remaining",
            "Requests left in the current quota window, as last reported."
        );
        describe_counter!(
            "tracker_limiter_waits_total",
            "Times the rate limiter delayed a request, by reason."
        );
    });
}

/// Resolves once shutdown has been broadcast, or the sender is gone.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Fetch one channel and merge the result.
pub async fn poll_once(
    source: &dyn ItemSource,
    aggregator: &Aggregator,
    channel: &str,
) -> anyhow::Result<IngestSummary> {
    ensure_metrics_described();

    let batch = match source.fetch(channel).await {
        Ok(batch) => batch,
        Err(e) => {
            counter!("tracker_fetch_errors_total", "channel" => channel.to_string()).increment(1);
            return Err(e).with_context(|| format!("{} fetch for r/{channel}", source.name()));
        }
    };

    let summary = aggregator
        .ingest(channel, batch.items)
        .context("merging batch")?;

    counter!("tracker_polls_total", "channel" => channel.to_string()).increment(1);
    counter!("tracker_items_new_total", "channel" => channel.to_string())
        .increment(summary.new_items as u64);
    gauge!("tracker_ranked_items", "channel" => channel.to_string()).set(summary.ranked as f64);

    tracing::info!(
        target: "ingest",
        channel,
        fetched = summary.fetched,
        new = summary.new_items,
        ranked = summary.ranked,
        quota_remaining = batch.quota.and_then(|q| q.remaining),
        "poll complete"
    );
    Ok(summary)
}

/// Spawn one polling task per tracked channel.
///
/// Each task polls right away, then every `interval`. Failures are logged and
/// retried on the next tick; they never affect other channels.
pub fn spawn_pollers(
    source: Arc<dyn ItemSource>,
    aggregator: Arc<Aggregator>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    aggregator
        .channels()
        .iter()
        .cloned()
        .map(|channel| {
            let source = Arc::clone(&source);
            let aggregator = Arc::clone(&aggregator);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                tracing::info!(channel = %channel, every_secs = interval.as_secs(), "poller started");

                loop {
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut shutdown) => break,
                        _ = ticker.tick() => {}
                    }

                    tokio::select! {
                        biased;
                        _ = cancelled(&mut shutdown) => break,
                        res = poll_once(source.as_ref(), &aggregator, &channel) => {
                            if let Err(e) = res {
                                tracing::warn!(channel = %channel, error = ?e, "poll failed");
                            }
                        }
                    }
                }

                tracing::info!(channel = %channel, "poller stopped");
            })
        })
        .collect()
}

/// Spawn the reporting task: first report after one `interval`, then every
/// `interval`, each rendered from a fresh snapshot.
pub fn spawn_reporter(
    aggregator: Arc<Aggregator>,
    interval: Duration,
    sink: Arc<dyn ReportSink>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            match aggregator.snapshot(None) {
                Ok(snapshot) => sink.emit(&report::render(&snapshot)),
                Err(e) => tracing::warn!(error = %e, "snapshot failed"),
            }
        }

        tracing::info!("reporter stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        time::timeout(Duration::from_secs(1), cancelled(&mut rx))
            .await
            .expect("cancelled should resolve");
    }

    #[tokio::test]
    async fn cancelled_resolves_on_broadcast() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        tx.send(true).unwrap();
        time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled should resolve")
            .unwrap();
    }
}

use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ratelimit::RateLimitConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the configured quota
    /// as a starting point for the remaining-requests gauge.
    pub fn init(rate_limit: &RateLimitConfig) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        gauge!("tracker_quota_remaining").set(f64::from(rate_limit.limit));
        Ok(Self { handle })
    }

    /// Handle that renders nothing but a valid (empty) exposition. For tests
    /// and for running without a global recorder.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Scrape endpoint for the tracker's counters and quota gauge, merged into
    /// the stats API.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route("/metrics", get(move || render(handle.clone())))
    }
}

async fn render(handle: PrometheusHandle) -> String {
    handle.render()
}

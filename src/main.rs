//! subreddit-stats: binary entrypoint.
//! Loads configuration, authenticates against Reddit, then runs one poller per
//! subreddit plus the reporter until SIGINT/SIGTERM.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subreddit_stats::api::{self, AppState};
use subreddit_stats::config::Config;
use subreddit_stats::metrics::Metrics;
use subreddit_stats::report::LogSink;
use subreddit_stats::scheduler::{spawn_pollers, spawn_reporter};
use subreddit_stats::source::reddit::RedditClient;
use subreddit_stats::{Aggregator, ItemSource, RateLimiter};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("subreddit_stats=info,ingest=info,report=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::load().context("loading configuration")?;
    tracing::info!(
        channels = ?cfg.channels,
        poll_secs = cfg.scheduler.poll_interval.as_secs(),
        report_secs = cfg.scheduler.report_interval.as_secs(),
        "configuration loaded"
    );

    let metrics = Metrics::init(&cfg.rate_limit).context("installing metrics recorder")?;
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit).context("rate limiter config")?);

    let client = RedditClient::new(cfg.reddit.clone(), Arc::clone(&limiter))
        .context("building reddit client")?;
    client
        .authenticate()
        .await
        .context("initial reddit authentication")?;
    let source: Arc<dyn ItemSource> = Arc::new(client);

    let aggregator = Arc::new(Aggregator::new(cfg.channels.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = spawn_pollers(
        Arc::clone(&source),
        Arc::clone(&aggregator),
        cfg.scheduler.poll_interval,
        shutdown_rx.clone(),
    );
    handles.push(spawn_reporter(
        Arc::clone(&aggregator),
        cfg.scheduler.report_interval,
        Arc::new(LogSink),
        shutdown_rx.clone(),
    ));

    if let Some(addr) = cfg.api_addr {
        let state = AppState {
            aggregator: Arc::clone(&aggregator),
            limiter: Arc::clone(&limiter),
        };
        let router = api::router(state, &metrics);
        handles.push(api::spawn_server(addr, router, shutdown_rx.clone()).await?);
    }

    shutdown_signal().await;
    tracing::info!("shutting down gracefully");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Err(e)) => tracing::warn!(error = %e, "task ended abnormally"),
            Err(_) => tracing::warn!("task did not stop in time"),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

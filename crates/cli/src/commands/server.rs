//! `server` command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{SharedClock, SystemClock};
use control_plane::{ControlServer, Publisher};
use sync_engine::{SourceSet, TimeSource};
use tracing::info;

use super::{load_blueprint, revalidate, shutdown_signal};
use crate::cli::ServerArgs;

/// Execute the `server` command
pub async fn run_server(args: &ServerArgs) -> Result<()> {
    let mut blueprint = load_blueprint(&args.config)?;

    if let Some(ref host) = args.host {
        info!(host = %host, "Overriding bind address from CLI");
        blueprint.server.host = host.clone();
    }
    if let Some(port) = args.port {
        info!(port, "Overriding subscription port from CLI");
        blueprint.server.port = port;
    }
    if let Some(port) = args.stream_port {
        info!(port, "Overriding stream port from CLI");
        blueprint.server.stream_port = Some(port);
    }
    revalidate(&blueprint)?;

    let clock = SystemClock::shared();
    sync_engine::ensure_time_precision(clock.as_ref())
        .context("Platform clock cannot timestamp samples")?;

    let sources = SourceSet::new(blueprint.time.mode, clock.clone());
    let server = ControlServer::bind(&blueprint.server, clock.clone())
        .await
        .context("Failed to start control server")?
        .with_sources(sources.clone());

    info!(
        addr = %server.local_addr()?,
        stream = ?server.stream_addr(),
        "Server listening"
    );

    let publisher = server.publisher();
    let feed = (!args.no_feed).then(|| {
        tokio::spawn(run_time_feed(
            publisher.clone(),
            clock.clone(),
            sources.time.clone(),
            blueprint.server.feed_rate_hz,
        ))
    });

    server
        .run(shutdown_signal())
        .await
        .context("Control server failed")?;

    if let Some(feed) = feed {
        feed.abort();
    }

    for (peer, snapshot) in publisher.session_metrics() {
        info!(
            %peer,
            sent = snapshot.sent_count,
            withheld = snapshot.withheld_count,
            failed = snapshot.failure_count,
            sync_attempts = snapshot.sync_attempts,
            "session summary"
        );
    }
    info!("pisc server finished");
    Ok(())
}

/// Publish the local clock as time until a stream peer provides one.
async fn run_time_feed(publisher: Publisher, clock: SharedClock, time: Arc<TimeSource>, rate_hz: f64) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rate_hz));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(rate_hz, "local time feed started");

    loop {
        ticker.tick().await;
        if time.is_set() {
            info!("time provided by a stream peer, local feed stopped");
            return;
        }
        let now = clock.now();
        publisher.new_time(now, now);
    }
}

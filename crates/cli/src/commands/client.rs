//! `client` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::SystemClock;
use control_plane::ControlClient;
use sensor_runtime::{build_sensors, SensorManager};
use sync_engine::SourceSet;
use tracing::{info, warn};

use super::{load_blueprint, revalidate, shutdown_signal};
use crate::cli::ClientArgs;

/// Execute the `client` command
pub async fn run_client(args: &ClientArgs) -> Result<()> {
    let mut blueprint = load_blueprint(&args.config)?;

    if let Some(ref host) = args.server_host {
        info!(host = %host, "Overriding server host from CLI");
        blueprint.client.server_host = host.clone();
    }
    if let Some(port) = args.server_port {
        info!(port, "Overriding server port from CLI");
        blueprint.client.server_port = port;
    }
    if args.no_sync {
        blueprint.client.require_sync = false;
    }
    revalidate(&blueprint)?;

    let clock = SystemClock::shared();
    sync_engine::ensure_time_precision(clock.as_ref())
        .context("Platform clock cannot timestamp samples")?;

    info!(
        server = %blueprint.client.server_address(),
        require_sync = blueprint.client.require_sync,
        time_mode = ?blueprint.time.mode,
        sensors = blueprint.sensors.len(),
        "Configuration loaded"
    );

    let sources = SourceSet::new(blueprint.time.mode, clock.clone());
    let manager = Arc::new(SensorManager::new(
        build_sensors(&blueprint, &sources),
        blueprint.lifecycle.clone(),
    ));

    // Sensor open may block on device I/O.
    let starter = Arc::clone(&manager);
    let started = tokio::task::spawn_blocking(move || starter.start_all())
        .await
        .context("Sensor start task failed")?;
    info!(started, "sensors running");

    let mut client = ControlClient::bind(
        blueprint.client.clone(),
        blueprint.sync,
        sources,
        manager.clone(),
        clock,
    )
    .await
    .context("Failed to open control link")?;

    client.run(shutdown_signal()).await;

    info!("closing sensors");
    let closer = Arc::clone(&manager);
    let report = tokio::task::spawn_blocking(move || closer.close_sensors())
        .await
        .context("Sensor close task failed")?;
    if !report.all_closed() {
        warn!(timed_out = ?report.timed_out, "some sensors did not close in time");
    }

    print!("{}", client.sync_summary());
    info!("pisc client finished");
    Ok(())
}

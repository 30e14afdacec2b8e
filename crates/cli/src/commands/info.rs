//! `info` command implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use contracts::FieldBlueprint;
use serde::Serialize;
use tracing::info;

use super::load_blueprint;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    server: ServerInfo,
    client: ClientInfo,
    sync: SyncInfo,
    time_mode: String,
    output_directory: String,
    sensors: Vec<SensorInfo>,
}

#[derive(Serialize)]
struct ServerInfo {
    bind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_port: Option<u16>,
    feed_rate_hz: f64,
}

#[derive(Serialize)]
struct ClientInfo {
    server: String,
    require_sync: bool,
    silence_timeout_s: f64,
}

#[derive(Serialize)]
struct SyncInfo {
    threshold_ms: f64,
    window: usize,
}

#[derive(Serialize)]
struct SensorInfo {
    id: usize,
    sensor_type: String,
    name: String,
    handlers: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    settings: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let blueprint = load_blueprint(&args.config)?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &FieldBlueprint, args: &InfoArgs) -> ConfigInfo {
    let sensors = blueprint
        .sensors
        .iter()
        .enumerate()
        .map(|(id, s)| SensorInfo {
            id,
            sensor_type: s.sensor_type.clone(),
            name: s.name.clone(),
            handlers: s.handlers.iter().map(|h| format!("{h:?}").to_lowercase()).collect(),
            settings: if args.sensors {
                s.settings.clone()
            } else {
                HashMap::new()
            },
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        server: ServerInfo {
            bind: format!("{}:{}", blueprint.server.host, blueprint.server.port),
            stream_port: blueprint.server.stream_port,
            feed_rate_hz: blueprint.server.feed_rate_hz,
        },
        client: ClientInfo {
            server: blueprint.client.server_address(),
            require_sync: blueprint.client.require_sync,
            silence_timeout_s: blueprint.client.silence_timeout_s,
        },
        sync: SyncInfo {
            threshold_ms: blueprint.sync.threshold_s * 1000.0,
            window: blueprint.sync.window,
        },
        time_mode: format!("{:?}", blueprint.time.mode),
        output_directory: blueprint.output.directory.display().to_string(),
        sensors,
    }
}

fn print_config_info(blueprint: &FieldBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    pisc Configuration                        ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let server = &blueprint.server;
    println!("📡 Server");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Bind: {}:{}", server.host, server.port);
    match server.stream_port {
        Some(port) => println!("   ├─ Stream listener: {}", port),
        None => println!("   ├─ Stream listener: disabled"),
    }
    println!("   └─ Local time feed: {} Hz", server.feed_rate_hz);

    let client = &blueprint.client;
    println!("\n🛰  Client");
    println!("   ├─ Server: {}", client.server_address());
    println!("   ├─ Require sync: {}", client.require_sync);
    println!(
        "   └─ Timeouts: connect {} s, silence {} s",
        client.connect_timeout_s, client.silence_timeout_s
    );

    println!("\n⚙️  Sync Settings");
    println!("   ├─ Threshold: {:.1} ms", blueprint.sync.threshold_s * 1000.0);
    println!("   ├─ Window: {}", blueprint.sync.window);
    println!("   └─ Time mode: {:?}", blueprint.time.mode);

    println!("\n📷 Sensors ({})", blueprint.sensors.len());
    for (i, sensor) in blueprint.sensors.iter().enumerate() {
        let is_last = i == blueprint.sensors.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} [{}] {} ({}) -> {:?}",
            prefix, i, sensor.name, sensor.sensor_type, sensor.handlers
        );
        if args.sensors {
            let mut settings: Vec<_> = sensor.settings.iter().collect();
            settings.sort();
            for (key, value) in settings {
                println!("   {}   {} = {}", child_prefix, key, value);
            }
        }
    }

    println!(
        "\n💾 Output: {} (buffer {})",
        blueprint.output.directory.display(),
        blueprint.output.buffer_size
    );
    println!();
}

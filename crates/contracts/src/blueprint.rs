//! FieldBlueprint - Config Loader output
//!
//! Describes one field deployment: the reference server, the sensor node's
//! link to it, sync tolerances, time source mode, sensor lifecycle budgets,
//! output location and the sensors themselves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ClockSyncConfig;

/// Default UDP port of the control server
pub const DEFAULT_SERVER_PORT: u16 = 50005;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete field configuration blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct FieldBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Reference (time-providing) node
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Sensor node's link to the server
    #[serde(default)]
    #[validate(nested)]
    pub client: ClientConfig,

    /// Sync convergence parameters
    #[serde(default)]
    #[validate(nested)]
    pub sync: ClockSyncConfig,

    /// Time source behaviour on the sensor node
    #[serde(default)]
    pub time: TimeConfig,

    /// Sensor lifecycle timing
    #[serde(default)]
    #[validate(nested)]
    pub lifecycle: LifecycleConfig,

    /// Data handler output
    #[serde(default)]
    pub output: OutputConfig,

    /// Sensors, ids are assigned in this order
    #[serde(default)]
    #[validate(nested)]
    pub sensors: Vec<SensorConfig>,
}

/// Control server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_server_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// UDP subscription port
    #[serde(default = "default_server_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Optional TCP port accepting `<...>` framed updates and commands
    #[serde(default)]
    pub stream_port: Option<u16>,

    /// How long a session waits for each sync reply (seconds)
    #[serde(default = "default_sync_reply_timeout")]
    #[validate(range(exclusive_min = 0.0))]
    pub sync_reply_timeout_s: f64,

    /// Rate of the local time feed used when no GPS adapter is attached (Hz)
    #[serde(default = "default_feed_rate")]
    #[validate(range(exclusive_min = 0.0, max = 1000.0))]
    pub feed_rate_hz: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            stream_port: None,
            sync_reply_timeout_s: default_sync_reply_timeout(),
            feed_rate_hz: default_feed_rate(),
        }
    }
}

impl ServerConfig {
    pub fn sync_reply_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.sync_reply_timeout_s)
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_sync_reply_timeout() -> f64 {
    1.0
}

fn default_feed_rate() -> f64 {
    10.0
}

/// Sensor node link settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClientConfig {
    /// Server host
    #[serde(default = "default_client_host")]
    #[validate(length(min = 1))]
    pub server_host: String,

    /// Server UDP port
    #[serde(default = "default_server_port")]
    #[validate(range(min = 1))]
    pub server_port: u16,

    /// Request the sync handshake before any data flows
    #[serde(default = "default_true")]
    pub require_sync: bool,

    /// Wait for `ack` per subscription attempt (seconds)
    #[serde(default = "default_connect_timeout")]
    #[validate(range(exclusive_min = 0.0))]
    pub connect_timeout_s: f64,

    /// Silence after which the link is considered lost (seconds)
    #[serde(default = "default_silence_timeout")]
    #[validate(range(exclusive_min = 0.0))]
    pub silence_timeout_s: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: default_client_host(),
            server_port: default_server_port(),
            require_sync: true,
            connect_timeout_s: default_connect_timeout(),
            silence_timeout_s: default_silence_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_s)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.silence_timeout_s)
    }
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> f64 {
    2.0
}

fn default_silence_timeout() -> f64 {
    7.0
}

/// Time source flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Latest value as-is
    Simple,
    /// Latest value plus local time elapsed since it changed
    Precise,
    /// First value wins, then advanced by local elapsed time
    #[default]
    RelativePrecise,
}

/// Time source settings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(default)]
    pub mode: TimeMode,
}

/// Sensor lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LifecycleConfig {
    /// Per-sensor budget for confirming a close (seconds)
    #[serde(default = "default_closing_budget")]
    #[validate(range(exclusive_min = 0.0))]
    pub closing_budget_s: f64,

    /// Interval between `is_closed` polls (ms)
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Sleep between flag checks while paused (ms)
    #[serde(default = "default_pause_poll")]
    #[validate(range(min = 1))]
    pub pause_poll_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            closing_budget_s: default_closing_budget(),
            poll_interval_ms: default_poll_interval(),
            pause_poll_ms: default_pause_poll(),
        }
    }
}

impl LifecycleConfig {
    pub fn closing_budget(&self) -> Duration {
        Duration::from_secs_f64(self.closing_budget_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

fn default_closing_budget() -> f64 {
    5.0
}

fn default_poll_interval() -> u64 {
    200
}

fn default_pause_poll() -> u64 {
    100
}

/// Data handler output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one CSV file per sensor
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// Samples buffered before a write; 0 and 1 flush every sample
    #[serde(default)]
    pub buffer_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            buffer_size: 0,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Data handler kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Csv,
    Log,
}

/// Sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SensorConfig {
    /// Sensor type (e.g. "position", "orientation", "mock")
    #[validate(length(min = 1))]
    pub sensor_type: String,

    /// Sensor name; not unique across types
    #[validate(length(min = 1))]
    pub name: String,

    /// Driver-specific settings
    #[serde(default)]
    pub settings: HashMap<String, String>,

    /// Data handlers attached to the sensor
    #[serde(default = "default_handlers")]
    pub handlers: Vec<HandlerKind>,
}

impl SensorConfig {
    /// Parse a driver setting, `None` if absent.
    pub fn setting<T: FromStr>(&self, key: &str) -> Option<Result<T, T::Err>> {
        self.settings.get(key).map(|raw| raw.trim().parse::<T>())
    }
}

fn default_handlers() -> Vec<HandlerKind> {
    vec![HandlerKind::Csv]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let blueprint = FieldBlueprint::default();
        assert_eq!(blueprint.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(blueprint.client.server_address(), "127.0.0.1:50005");
        assert_eq!(blueprint.sync.window, 5);
        assert_eq!(blueprint.sync.threshold_s, 0.015);
        assert_eq!(blueprint.time.mode, TimeMode::RelativePrecise);
        assert_eq!(blueprint.lifecycle.poll_interval(), Duration::from_millis(200));
        assert_eq!(blueprint.lifecycle.closing_budget(), Duration::from_secs(5));
        assert!(blueprint.validate().is_ok());
    }

    #[test]
    fn test_field_rules() {
        let mut blueprint = FieldBlueprint::default();
        blueprint.sync.window = 1;
        assert!(blueprint.validate().is_err());

        let mut blueprint = FieldBlueprint::default();
        blueprint.lifecycle.closing_budget_s = 0.0;
        assert!(blueprint.validate().is_err());
    }

    #[test]
    fn test_sensor_setting() {
        let sensor = SensorConfig {
            sensor_type: "mock".into(),
            name: "m".into(),
            settings: HashMap::from([("rate_hz".into(), " 20 ".into())]),
            handlers: default_handlers(),
        };
        assert_eq!(sensor.setting::<f64>("rate_hz"), Some(Ok(20.0)));
        assert!(sensor.setting::<f64>("missing").is_none());
    }
}

//! Mock sensor implementation
//!
//! Generates `(time, seq)` samples at a fixed rate. Open failure and close
//! latency are configurable so lifecycle handling can be exercised without
//! hardware. Commands are echoed as a third field on the next sample.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use contracts::{ContractError, SampleEmitter, SampleValue, SensorConfig, SensorDriver, SensorInfo};
use sync_engine::TimeSource;
use tracing::{debug, trace};

use crate::error::{Result, SensorError};

/// One sample every 1000 s at most.
const MIN_RATE_HZ: f64 = 0.001;

/// Mock sensor configuration
#[derive(Debug, Clone)]
pub struct MockSettings {
    /// Sample rate (Hz)
    pub rate_hz: f64,
    /// Make `open` fail
    pub fail_open: bool,
    /// Time `close` takes
    pub close_latency: Duration,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            fail_open: false,
            close_latency: Duration::ZERO,
        }
    }
}

impl MockSettings {
    /// Read `rate_hz`, `fail_open` and `close_latency_ms` from a sensor's settings.
    pub fn from_config(config: &SensorConfig, info: &SensorInfo) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(rate) = config.setting::<f64>("rate_hz") {
            let rate = rate.map_err(|e| SensorError::invalid_setting(info, "rate_hz", e.to_string()))?;
            if !rate.is_finite() || rate < MIN_RATE_HZ {
                return Err(SensorError::invalid_setting(
                    info,
                    "rate_hz",
                    format!("must be a finite rate of at least {MIN_RATE_HZ} Hz"),
                ));
            }
            settings.rate_hz = rate;
        }
        if let Some(fail) = config.setting::<bool>("fail_open") {
            settings.fail_open =
                fail.map_err(|e| SensorError::invalid_setting(info, "fail_open", e.to_string()))?;
        }
        if let Some(latency) = config.setting::<u64>("close_latency_ms") {
            let ms = latency
                .map_err(|e| SensorError::invalid_setting(info, "close_latency_ms", e.to_string()))?;
            settings.close_latency = Duration::from_millis(ms);
        }

        Ok(settings)
    }
}

/// Mock sensor driver
pub struct MockDriver {
    info: SensorInfo,
    settings: MockSettings,
    time: Option<Arc<TimeSource>>,
    seq: i64,
    commands: VecDeque<String>,
}

impl MockDriver {
    /// Create a mock; samples are stamped from `time` when given, 0 otherwise.
    pub fn new(info: SensorInfo, settings: MockSettings, time: Option<Arc<TimeSource>>) -> Self {
        Self {
            info,
            settings,
            time,
            seq: 0,
            commands: VecDeque::new(),
        }
    }
}

impl SensorDriver for MockDriver {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn open(&mut self) -> std::result::Result<(), ContractError> {
        if self.settings.fail_open {
            return Err(ContractError::sensor_open(
                self.info.to_string(),
                "configured to fail",
            ));
        }
        debug!(sensor = %self.info, rate_hz = self.settings.rate_hz, "mock sensor opened");
        Ok(())
    }

    fn metadata(&self) -> Vec<String> {
        vec!["utc_time".to_string(), "seq".to_string()]
    }

    fn poll(&mut self, emitter: &mut dyn SampleEmitter) -> std::result::Result<(), ContractError> {
        thread::sleep(Duration::from_secs_f64(1.0 / self.settings.rate_hz));

        self.seq += 1;
        let time = self.time.as_ref().map_or(0.0, |t| t.get());
        let mut sample = vec![SampleValue::Float(time), SampleValue::Int(self.seq)];
        if let Some(command) = self.commands.pop_front() {
            sample.push(SampleValue::Text(command));
        }
        emitter.emit(&sample);

        trace!(sensor = %self.info, seq = self.seq, "mock sample emitted");
        Ok(())
    }

    fn handle_command(&mut self, command: &str) -> std::result::Result<(), ContractError> {
        self.commands.push_back(command.to_string());
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), ContractError> {
        thread::sleep(self.settings.close_latency);
        debug!(sensor = %self.info, "mock sensor closed");
        Ok(())
    }
}

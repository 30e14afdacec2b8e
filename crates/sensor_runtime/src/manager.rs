//! SensorManager - starts, pauses, resumes and closes every sensor of a node

use std::thread;
use std::time::Instant;

use contracts::{CommandSink, LifecycleConfig, SensorInfo, SensorSelector, SensorState};
use tracing::{info, instrument, warn};

use crate::sensor::Sensor;

/// Outcome of [`SensorManager::close_sensors`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Sensors confirmed closed
    pub closed: Vec<u32>,
    /// Sensors still running when their budget ran out
    pub timed_out: Vec<u32>,
}

impl CloseReport {
    pub fn all_closed(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Owner of a node's sensors
#[derive(Debug)]
pub struct SensorManager {
    sensors: Vec<Sensor>,
    lifecycle: LifecycleConfig,
}

impl SensorManager {
    pub fn new(sensors: Vec<Sensor>, lifecycle: LifecycleConfig) -> Self {
        Self { sensors, lifecycle }
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensors matching `selector`.
    pub fn select<'a>(&'a self, selector: &'a SensorSelector) -> impl Iterator<Item = &'a Sensor> {
        self.sensors
            .iter()
            .filter(move |sensor| selector.matches(sensor.info()))
    }

    pub fn states(&self) -> Vec<(SensorInfo, SensorState)> {
        self.sensors
            .iter()
            .map(|sensor| (sensor.info().clone(), sensor.state()))
            .collect()
    }

    /// Open and start every sensor. A failing sensor is logged and skipped.
    ///
    /// Returns the number of sensors running.
    #[instrument(name = "sensor_manager_start_all", skip(self), fields(sensors = self.sensors.len()))]
    pub fn start_all(&self) -> usize {
        let mut started = 0;
        for sensor in &self.sensors {
            match sensor.start() {
                Ok(()) => started += 1,
                Err(e) => warn!(sensor = %sensor.info(), error = %e, "sensor not started"),
            }
        }
        info!(started, total = self.sensors.len(), "sensors started");
        started
    }

    pub fn stop_all(&self) {
        self.sensors.iter().for_each(Sensor::stop);
    }

    pub fn resume_all(&self) {
        self.sensors.iter().for_each(Sensor::resume);
    }

    /// Close sensors one at a time, waiting up to the closing budget for each.
    ///
    /// A sensor that does not confirm in time is reported and left behind.
    #[instrument(name = "sensor_manager_close", skip(self), fields(sensors = self.sensors.len()))]
    pub fn close_sensors(&self) -> CloseReport {
        let budget = self.lifecycle.closing_budget();
        let poll = self.lifecycle.poll_interval();
        let mut report = CloseReport::default();

        for sensor in &self.sensors {
            let id = sensor.info().id;
            if sensor.is_closed() {
                sensor.join();
                report.closed.push(id);
                continue;
            }

            let started = Instant::now();
            sensor.close();
            loop {
                if sensor.is_closed() {
                    sensor.join();
                    report.closed.push(id);
                    break;
                }
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    warn!(
                        sensor = %sensor.info(),
                        budget_s = budget.as_secs_f64(),
                        "sensor did not close in time"
                    );
                    observability::record_close_timeout(&sensor.info().sensor_type);
                    report.timed_out.push(id);
                    break;
                }
                thread::sleep(poll.min(budget - elapsed));
            }
        }

        info!(
            closed = report.closed.len(),
            timed_out = report.timed_out.len(),
            "sensors closed"
        );
        report
    }
}

impl CommandSink for SensorManager {
    fn dispatch(&self, selector: &SensorSelector, command: &str) -> usize {
        let mut routed = 0;
        for sensor in self.select(selector) {
            if sensor.send_command(command) {
                routed += 1;
            } else {
                warn!(sensor = %sensor.info(), command, "sensor not running, command dropped");
            }
        }
        if routed == 0 {
            info!(%selector, command, "command matched no running sensor");
        }
        routed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{MockDriver, MockSettings};
    use crate::handlers::HandlerSet;
    use std::time::Duration;

    fn mock(id: u32, name: &str, settings: MockSettings) -> Sensor {
        let driver = MockDriver::new(SensorInfo::new("mock", name, id), settings, None);
        Sensor::new(
            Box::new(driver),
            HandlerSet::new("mock", Vec::new()),
            Duration::from_millis(5),
        )
    }

    fn fast() -> MockSettings {
        MockSettings {
            rate_hz: 200.0,
            ..MockSettings::default()
        }
    }

    fn lifecycle(budget_s: f64) -> LifecycleConfig {
        LifecycleConfig {
            closing_budget_s: budget_s,
            poll_interval_ms: 10,
            pause_poll_ms: 5,
        }
    }

    #[test]
    fn test_open_failure_does_not_block_others() {
        let failing = MockSettings {
            fail_open: true,
            ..fast()
        };
        let manager = SensorManager::new(
            vec![mock(0, "a", fast()), mock(1, "b", failing), mock(2, "c", fast())],
            lifecycle(1.0),
        );
        assert_eq!(manager.start_all(), 2);
        assert_eq!(manager.sensors()[1].state(), SensorState::Created);

        let report = manager.close_sensors();
        assert!(report.all_closed());
        assert_eq!(report.closed, vec![0, 1, 2]);
    }

    #[test]
    fn test_close_within_budget() {
        let slow = MockSettings {
            close_latency: Duration::from_millis(50),
            ..fast()
        };
        let manager = SensorManager::new(vec![mock(0, "a", slow)], lifecycle(1.0));
        manager.start_all();

        let report = manager.close_sensors();
        assert_eq!(report.closed, vec![0]);
        assert_eq!(manager.sensors()[0].state(), SensorState::Closed);
    }

    #[test]
    fn test_close_budget_exhausted() {
        let stuck = MockSettings {
            close_latency: Duration::from_millis(600),
            ..fast()
        };
        let manager = SensorManager::new(
            vec![mock(0, "stuck", stuck), mock(1, "ok", fast())],
            lifecycle(0.1),
        );
        manager.start_all();

        let started = Instant::now();
        let report = manager.close_sensors();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(report.timed_out, vec![0]);
        assert_eq!(report.closed, vec![1]);
    }

    #[test]
    fn test_dispatch_by_selector() {
        let manager = SensorManager::new(
            vec![mock(0, "a", fast()), mock(1, "a", fast()), mock(2, "b", fast())],
            lifecycle(1.0),
        );
        assert_eq!(manager.dispatch(&SensorSelector::ByName("a".into()), "x"), 0);

        manager.start_all();
        assert_eq!(manager.dispatch(&SensorSelector::ByName("a".into()), "x"), 2);
        assert_eq!(manager.dispatch(&SensorSelector::ById(2), "x"), 1);
        assert_eq!(manager.dispatch(&SensorSelector::ByType("mock".into()), "x"), 3);
        assert_eq!(manager.dispatch(&SensorSelector::ByType("camera".into()), "x"), 0);

        manager.stop_all();
        assert!(manager
            .states()
            .iter()
            .all(|(_, state)| *state == SensorState::Paused));
        manager.resume_all();
        manager.close_sensors();
    }
}

//! Sensor - lifecycle state machine around one driver and its thread
//!
//! The driver runs on a dedicated OS thread. Other threads only flip flags
//! (`stop`, `resume`, `close`) and queue commands; the sensor thread reads
//! them at the top of every iteration and is the only one that touches the
//! driver after start. Teardown happens on that thread, which then marks the
//! sensor closed.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use contracts::{SampleEmitter, SensorDriver, SensorInfo, SensorState};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, SensorError};
use crate::handlers::HandlerSet;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Flags shared between the owner and the sensor thread
#[derive(Debug)]
struct SensorFlags {
    paused: AtomicBool,
    close_requested: AtomicBool,
    state: AtomicU8,
}

impl SensorFlags {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            state: AtomicU8::new(SensorState::Created as u8),
        }
    }

    fn state(&self) -> SensorState {
        SensorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SensorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: SensorState, to: SensorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One sensor: driver, handlers, flags and thread
pub struct Sensor {
    info: SensorInfo,
    /// Driver and handlers until the thread takes them
    pending: Mutex<Option<(Box<dyn SensorDriver>, HandlerSet)>>,
    flags: Arc<SensorFlags>,
    commands: Mutex<Option<Sender<String>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    pause_poll: Duration,
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("info", &self.info)
            .field("state", &self.state())
            .finish()
    }
}

impl Sensor {
    /// Wrap a driver; nothing is opened until [`Sensor::start`].
    pub fn new(driver: Box<dyn SensorDriver>, handlers: HandlerSet, pause_poll: Duration) -> Self {
        let info = driver.info().clone();
        Self {
            info,
            pending: Mutex::new(Some((driver, handlers))),
            flags: Arc::new(SensorFlags::new()),
            commands: Mutex::new(None),
            thread: Mutex::new(None),
            pause_poll,
        }
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    pub fn state(&self) -> SensorState {
        self.flags.state()
    }

    /// Open the driver and start the sensor thread.
    ///
    /// On open failure the sensor stays `Created` and can be started again.
    #[instrument(name = "sensor_start", skip(self), fields(sensor = %self.info))]
    pub fn start(&self) -> Result<()> {
        let mut pending = lock(&self.pending);
        let Some((mut driver, mut handlers)) = pending.take() else {
            return Err(SensorError::AlreadyStarted {
                sensor: self.info.to_string(),
            });
        };

        self.flags.set_state(SensorState::Opening);
        if let Err(e) = driver.open() {
            self.flags.set_state(SensorState::Created);
            *pending = Some((driver, handlers));
            return Err(SensorError::open_failed(&self.info, e));
        }
        drop(pending);

        let metadata = driver.metadata();
        if !metadata.is_empty() {
            handlers.emit_metadata(&metadata);
        }

        let (tx, rx) = mpsc::channel();
        self.flags.set_state(SensorState::Running);
        if self.flags.paused.load(Ordering::Acquire) {
            self.flags
                .transition(SensorState::Running, SensorState::Paused);
        }

        let flags = Arc::clone(&self.flags);
        let pause_poll = self.pause_poll;
        let spawned = thread::Builder::new()
            .name(format!("sensor-{}", self.info.id))
            .spawn(move || run_sensor(driver, handlers, rx, flags, pause_poll));

        match spawned {
            Ok(handle) => {
                *lock(&self.thread) = Some(handle);
                *lock(&self.commands) = Some(tx);
                info!("sensor started");
                Ok(())
            }
            Err(source) => {
                // The driver went down with the closure.
                self.flags.set_state(SensorState::Closed);
                Err(SensorError::SpawnFailed {
                    sensor: self.info.to_string(),
                    source,
                })
            }
        }
    }

    /// Pause sample production.
    pub fn stop(&self) {
        self.flags.paused.store(true, Ordering::Release);
        self.flags
            .transition(SensorState::Running, SensorState::Paused);
    }

    /// Resume sample production.
    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::Release);
        self.flags
            .transition(SensorState::Paused, SensorState::Running);
    }

    /// Ask the sensor thread to shut down. Returns immediately.
    pub fn close(&self) {
        self.flags.close_requested.store(true, Ordering::Release);
        let _ = self
            .flags
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match SensorState::from_u8(raw) {
                    SensorState::Running | SensorState::Paused | SensorState::Opening => {
                        Some(SensorState::CloseRequested as u8)
                    }
                    _ => None,
                }
            });
    }

    /// True once the sensor thread has released its resources, or if it
    /// never started.
    pub fn is_closed(&self) -> bool {
        matches!(self.state(), SensorState::Created | SensorState::Closed)
    }

    /// Queue a command for the sensor thread.
    ///
    /// Returns false if the sensor is not running.
    pub fn send_command(&self, command: &str) -> bool {
        match lock(&self.commands).as_ref() {
            Some(tx) => tx.send(command.to_string()).is_ok(),
            None => false,
        }
    }

    /// Reap the thread of a closed sensor.
    pub(crate) fn join(&self) {
        let Some(handle) = lock(&self.thread).take() else {
            return;
        };
        if handle.join().is_err() {
            error!(sensor = %self.info, "sensor thread panicked");
        }
    }
}

/// Sensor thread body
fn run_sensor(
    mut driver: Box<dyn SensorDriver>,
    mut handlers: HandlerSet,
    commands: Receiver<String>,
    flags: Arc<SensorFlags>,
    pause_poll: Duration,
) {
    let sensor = driver.info().clone();
    debug!(%sensor, "sensor thread started");

    loop {
        if flags.close_requested.load(Ordering::Acquire) {
            break;
        }

        while let Ok(command) = commands.try_recv() {
            if let Err(e) = driver.handle_command(&command) {
                warn!(%sensor, %command, error = %e, "command failed");
            }
        }

        if flags.paused.load(Ordering::Acquire) {
            thread::sleep(pause_poll);
            continue;
        }

        if let Err(e) = driver.poll(&mut handlers) {
            warn!(%sensor, error = %e, "sensor read failed");
            thread::sleep(pause_poll);
        }
    }

    if let Err(e) = driver.close() {
        warn!(%sensor, error = %e, "sensor close failed");
    }
    handlers.terminate();
    flags.set_state(SensorState::Closed);
    info!(%sensor, "sensor closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{MockDriver, MockSettings};
    use crate::handlers::testing::RecordingHandler;
    use std::time::Instant;

    fn mock_sensor(settings: MockSettings) -> (Sensor, RecordingHandler) {
        let recorder = RecordingHandler::default();
        let driver = MockDriver::new(SensorInfo::new("mock", "m", 0), settings, None);
        let handlers = HandlerSet::new("mock", vec![Box::new(recorder.clone())]);
        (
            Sensor::new(Box::new(driver), handlers, Duration::from_millis(5)),
            recorder,
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (sensor, recorder) = mock_sensor(MockSettings {
            rate_hz: 200.0,
            ..MockSettings::default()
        });
        assert_eq!(sensor.state(), SensorState::Created);
        assert!(sensor.is_closed());

        sensor.start().unwrap();
        assert_eq!(sensor.state(), SensorState::Running);
        assert!(wait_until(|| !recorder.samples.lock().unwrap().is_empty()));
        assert_eq!(recorder.metadata.lock().unwrap().len(), 1);

        sensor.stop();
        assert_eq!(sensor.state(), SensorState::Paused);
        sensor.resume();
        assert_eq!(sensor.state(), SensorState::Running);

        sensor.close();
        assert!(wait_until(|| sensor.is_closed()));
        assert_eq!(sensor.state(), SensorState::Closed);
        sensor.join();
        assert!(*recorder.terminated.lock().unwrap());
    }

    #[test]
    fn test_open_failure_stays_created() {
        let (sensor, recorder) = mock_sensor(MockSettings {
            fail_open: true,
            ..MockSettings::default()
        });
        let result = sensor.start();
        assert!(matches!(result, Err(SensorError::OpenFailed { .. })));
        assert_eq!(sensor.state(), SensorState::Created);
        assert!(!sensor.send_command("noop"));
        assert!(recorder.samples.lock().unwrap().is_empty());
    }

    #[test]
    fn test_paused_sensor_emits_nothing() {
        let (sensor, recorder) = mock_sensor(MockSettings {
            rate_hz: 500.0,
            ..MockSettings::default()
        });
        sensor.stop();
        sensor.start().unwrap();
        assert_eq!(sensor.state(), SensorState::Paused);
        thread::sleep(Duration::from_millis(50));
        assert!(recorder.samples.lock().unwrap().is_empty());

        sensor.close();
        assert!(wait_until(|| sensor.is_closed()));
    }

    #[test]
    fn test_commands_reach_driver() {
        let (sensor, recorder) = mock_sensor(MockSettings {
            rate_hz: 200.0,
            ..MockSettings::default()
        });
        sensor.start().unwrap();
        assert!(sensor.send_command("mark,1"));

        let marked = wait_until(|| {
            recorder
                .samples
                .lock()
                .unwrap()
                .iter()
                .any(|s| s.last() == Some(&"mark,1".into()))
        });
        assert!(marked);

        sensor.close();
        assert!(wait_until(|| sensor.is_closed()));
    }

    #[test]
    fn test_double_start_rejected() {
        let (sensor, _) = mock_sensor(MockSettings::default());
        sensor.start().unwrap();
        assert!(matches!(
            sensor.start(),
            Err(SensorError::AlreadyStarted { .. })
        ));
        sensor.close();
        assert!(wait_until(|| sensor.is_closed()));
    }
}

//! Pass-through sensors forwarding the shared position and orientation
//!
//! Each poll waits up to half a second for a value newer than the last one
//! forwarded, so close requests are observed promptly.

use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, SampleEmitter, SampleValue, SensorDriver, SensorInfo};
use sync_engine::{OrientationSource, PositionSource};

/// Wait per poll for a new value
pub const PASSER_WAIT: Duration = Duration::from_millis(500);

/// Forwards each new position as `(time, frame, x, y, z[, zone])`
pub struct PositionPasser {
    info: SensorInfo,
    source: Arc<PositionSource>,
    last_utc: f64,
    wait: Duration,
}

impl PositionPasser {
    pub fn new(info: SensorInfo, source: Arc<PositionSource>) -> Self {
        Self {
            info,
            source,
            last_utc: 0.0,
            wait: PASSER_WAIT,
        }
    }
}

impl SensorDriver for PositionPasser {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn open(&mut self) -> Result<(), ContractError> {
        self.last_utc = self.source.get().utc_time;
        Ok(())
    }

    fn poll(&mut self, emitter: &mut dyn SampleEmitter) -> Result<(), ContractError> {
        let Some(position) = self.source.wait_newer(self.last_utc, self.wait) else {
            return Ok(());
        };
        self.last_utc = position.utc_time;

        let mut sample = vec![
            SampleValue::Float(position.utc_time),
            SampleValue::Text(position.frame),
            SampleValue::Float(position.coords.x),
            SampleValue::Float(position.coords.y),
            SampleValue::Float(position.coords.z),
        ];
        if let Some(zone) = position.zone {
            sample.push(SampleValue::Text(zone));
        }
        emitter.emit(&sample);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

/// Forwards each new orientation as `(time, frame, rotation_type, r1, r2, r3, r4)`
pub struct OrientationPasser {
    info: SensorInfo,
    source: Arc<OrientationSource>,
    last_utc: f64,
    wait: Duration,
}

impl OrientationPasser {
    pub fn new(info: SensorInfo, source: Arc<OrientationSource>) -> Self {
        Self {
            info,
            source,
            last_utc: 0.0,
            wait: PASSER_WAIT,
        }
    }
}

impl SensorDriver for OrientationPasser {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn open(&mut self) -> Result<(), ContractError> {
        self.last_utc = self.source.get().utc_time;
        Ok(())
    }

    fn poll(&mut self, emitter: &mut dyn SampleEmitter) -> Result<(), ContractError> {
        let Some(orientation) = self.source.wait_newer(self.last_utc, self.wait) else {
            return Ok(());
        };
        self.last_utc = orientation.utc_time;

        let mut sample = vec![
            SampleValue::Float(orientation.utc_time),
            SampleValue::Text(orientation.frame),
            SampleValue::Text(orientation.rotation.to_string()),
        ];
        sample.extend(orientation.components.iter().copied().map(SampleValue::Float));
        emitter.emit(&sample);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{OrientationValue, PositionValue, RotationType, Vector3};

    #[derive(Default)]
    struct Collect(Vec<Vec<SampleValue>>);

    impl SampleEmitter for Collect {
        fn emit(&mut self, sample: &[SampleValue]) {
            self.0.push(sample.to_vec());
        }

        fn emit_metadata(&mut self, _metadata: &[String]) {}
    }

    #[test]
    fn test_position_passer_forwards_new_values_only() {
        let source = Arc::new(PositionSource::default());
        let mut passer = PositionPasser::new(SensorInfo::new("position", "gps", 0), source.clone());
        passer.wait = Duration::from_millis(20);
        passer.open().unwrap();

        let mut out = Collect::default();
        passer.poll(&mut out).unwrap();
        assert!(out.0.is_empty());

        source.set(PositionValue::new(10.0, "LLA", Vector3::new(1.0, 2.0, 3.0), None));
        passer.poll(&mut out).unwrap();
        passer.poll(&mut out).unwrap();
        assert_eq!(out.0.len(), 1);
        assert_eq!(out.0[0].len(), 5);
        assert_eq!(out.0[0][1], SampleValue::from("LLA"));

        source.set(PositionValue::new(
            11.0,
            "UTM",
            Vector3::default(),
            Some("14S".into()),
        ));
        passer.poll(&mut out).unwrap();
        assert_eq!(out.0[1].last(), Some(&SampleValue::from("14S")));
    }

    #[test]
    fn test_orientation_passer_sample_shape() {
        let source = Arc::new(OrientationSource::default());
        let mut passer =
            OrientationPasser::new(SensorInfo::new("orientation", "imu", 1), source.clone());
        passer.wait = Duration::from_millis(20);
        passer.open().unwrap();

        source.set(OrientationValue::euler(
            5.0,
            "ENU",
            RotationType::default(),
            [0.1, 0.2, 0.3],
        ));
        let mut out = Collect::default();
        passer.poll(&mut out).unwrap();
        assert_eq!(out.0.len(), 1);
        assert_eq!(out.0[0].len(), 7);
        assert_eq!(out.0[0][2], SampleValue::Text(RotationType::default().to_string()));
    }
}

//! Sensor factory - builds sensors from the `[[sensors]]` blueprint section

use contracts::{
    DataHandler, FieldBlueprint, HandlerKind, OutputConfig, SensorConfig, SensorDriver, SensorInfo,
};
use sync_engine::SourceSet;
use tracing::{info, instrument, warn};

use crate::drivers::{MockDriver, MockSettings, OrientationPasser, PositionPasser};
use crate::error::{Result, SensorError};
use crate::handlers::{CsvLogHandler, HandlerSet, LogHandler};
use crate::sensor::Sensor;

/// Sensor types with a built-in driver
pub const BUILTIN_TYPES: &[&str] = &["position", "orientation", "mock"];

/// Create the driver for one configured sensor.
pub fn create_driver(
    info: SensorInfo,
    config: &SensorConfig,
    sources: &SourceSet,
) -> Result<Box<dyn SensorDriver>> {
    let driver: Box<dyn SensorDriver> = match config.sensor_type.as_str() {
        "position" => Box::new(PositionPasser::new(info, sources.position.clone())),
        "orientation" => Box::new(OrientationPasser::new(info, sources.orientation.clone())),
        "mock" => {
            let settings = MockSettings::from_config(config, &info)?;
            Box::new(MockDriver::new(info, settings, Some(sources.time.clone())))
        }
        other => {
            return Err(SensorError::UnknownType {
                sensor_type: other.to_string(),
            })
        }
    };
    Ok(driver)
}

/// Create the handlers configured for one sensor.
pub fn create_handlers(info: &SensorInfo, kinds: &[HandlerKind], output: &OutputConfig) -> HandlerSet {
    let handlers = kinds
        .iter()
        .map(|kind| -> Box<dyn DataHandler> {
            match kind {
                HandlerKind::Csv => Box::new(CsvLogHandler::new(
                    &output.directory,
                    info,
                    output.buffer_size,
                )),
                HandlerKind::Log => Box::new(LogHandler::new(info)),
            }
        })
        .collect();
    HandlerSet::new(info.sensor_type.clone(), handlers)
}

/// Build every configured sensor.
///
/// Ids follow configuration order. Sensors that cannot be built are logged
/// and skipped; their ids are not reused.
#[instrument(name = "sensor_factory_build", skip_all, fields(configured = blueprint.sensors.len()))]
pub fn build_sensors(blueprint: &FieldBlueprint, sources: &SourceSet) -> Vec<Sensor> {
    let pause_poll = blueprint.lifecycle.pause_poll();
    let mut sensors = Vec::new();

    for (index, config) in blueprint.sensors.iter().enumerate() {
        let Ok(id) = u32::try_from(index) else {
            warn!(index, "too many sensors configured");
            break;
        };
        let info = SensorInfo::new(&config.sensor_type, &config.name, id);

        match create_driver(info.clone(), config, sources) {
            Ok(driver) => {
                let handlers = create_handlers(&info, &config.handlers, &blueprint.output);
                sensors.push(Sensor::new(driver, handlers, pause_poll));
            }
            Err(e) => warn!(sensor = %info, error = %e, "skipping sensor"),
        }
    }

    info!(created = sensors.len(), "sensors created");
    sensors
}

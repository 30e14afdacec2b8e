//! Configuration validation
//!
//! Field ranges come from the `validator` derives on the blueprint types;
//! the rules spanning several fields live here:
//! - finite sync threshold
//! - timeouts and budgets representable as durations
//! - sensor names unique per sensor type
//! - stream listener on a different port number than the subscription socket
//! - close polling interval no longer than the closing budget
//! - silence timeout longer than the connect timeout
//! - non-empty output directory

use std::collections::HashSet;

use contracts::{ContractError, FieldBlueprint};
use validator::{Validate, ValidationErrors};

/// Upper bound for any configured timeout or budget (one day).
pub const MAX_DURATION_S: f64 = 86_400.0;

/// Validate a FieldBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(field_error)?;
    validate_sync(blueprint)?;
    validate_durations(blueprint)?;
    validate_sensor_names(blueprint)?;
    validate_ports(blueprint)?;
    validate_lifecycle(blueprint)?;
    validate_client_timeouts(blueprint)?;
    validate_output(blueprint)?;
    Ok(())
}

fn field_error(errors: ValidationErrors) -> ContractError {
    let mut fields: Vec<&str> = errors.errors().keys().map(|k| k.as_ref()).collect();
    fields.sort_unstable();
    ContractError::config_validation(fields.join(","), errors.to_string())
}

fn validate_sync(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    if !blueprint.sync.threshold_s.is_finite() {
        return Err(ContractError::config_validation(
            "sync.threshold_s",
            "threshold must be a finite number of seconds",
        ));
    }
    Ok(())
}

/// Seconds fields are converted with `Duration::from_secs_f64` downstream.
fn validate_durations(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    let fields = [
        ("server.sync_reply_timeout_s", blueprint.server.sync_reply_timeout_s),
        ("client.connect_timeout_s", blueprint.client.connect_timeout_s),
        ("client.silence_timeout_s", blueprint.client.silence_timeout_s),
        ("lifecycle.closing_budget_s", blueprint.lifecycle.closing_budget_s),
    ];
    for (field, seconds) in fields {
        if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_DURATION_S {
            return Err(ContractError::config_validation(
                field,
                format!("{seconds} must be a finite number of seconds in (0, {MAX_DURATION_S}]"),
            ));
        }
    }

    let feed_rate = blueprint.server.feed_rate_hz;
    if !feed_rate.is_finite() || 1.0 / feed_rate > MAX_DURATION_S {
        return Err(ContractError::config_validation(
            "server.feed_rate_hz",
            format!("{feed_rate} Hz gives no usable feed period"),
        ));
    }
    Ok(())
}

/// (type, name) pairs must be unique
fn validate_sensor_names(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sensor) in blueprint.sensors.iter().enumerate() {
        if !seen.insert((sensor.sensor_type.as_str(), sensor.name.as_str())) {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}].name"),
                format!(
                    "duplicate sensor name '{}' for type '{}'",
                    sensor.name, sensor.sensor_type
                ),
            ));
        }
    }
    Ok(())
}

fn validate_ports(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    let server = &blueprint.server;
    if server.port != 0 && server.stream_port == Some(server.port) {
        return Err(ContractError::config_validation(
            "server.stream_port",
            format!("stream_port must differ from port ({})", server.port),
        ));
    }
    Ok(())
}

fn validate_lifecycle(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    let lifecycle = &blueprint.lifecycle;
    if lifecycle.poll_interval() > lifecycle.closing_budget() {
        return Err(ContractError::config_validation(
            "lifecycle.poll_interval_ms",
            format!(
                "poll interval ({} ms) exceeds closing budget ({} s)",
                lifecycle.poll_interval_ms, lifecycle.closing_budget_s
            ),
        ));
    }
    Ok(())
}

fn validate_client_timeouts(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    let client = &blueprint.client;
    if client.silence_timeout_s <= client.connect_timeout_s {
        return Err(ContractError::config_validation(
            "client.silence_timeout_s",
            format!(
                "silence_timeout_s ({}) must be greater than connect_timeout_s ({})",
                client.silence_timeout_s, client.connect_timeout_s
            ),
        ));
    }
    Ok(())
}

fn validate_output(blueprint: &FieldBlueprint) -> Result<(), ContractError> {
    if blueprint.output.directory.as_os_str().is_empty() {
        return Err(ContractError::config_validation(
            "output.directory",
            "output directory cannot be empty",
        ));
    }
    Ok(())
}

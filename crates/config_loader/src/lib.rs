//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate field ranges and cross-field rules
//! - Generate `FieldBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("field.toml")).unwrap();
//! println!("Server: {}", blueprint.client.server_address());
//! ```

mod parser;
mod rules;

pub use contracts::FieldBlueprint;
pub use parser::ConfigFormat;
pub use rules::validate;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<FieldBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<FieldBlueprint, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize FieldBlueprint to TOML string
    pub fn to_toml(blueprint: &FieldBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize FieldBlueprint to JSON string
    pub fn to_json(blueprint: &FieldBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<FieldBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        rules::validate(&blueprint)?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{HandlerKind, TimeMode};
    use std::io::Write;

    const FIELD_TOML: &str = r#"
[server]
port = 50005
stream_port = 50006

[client]
server_host = "192.168.1.10"
require_sync = true

[sync]
threshold_s = 0.01
window = 5

[time]
mode = "precise"

[output]
directory = "/var/lib/field"
buffer_size = 16

[[sensors]]
sensor_type = "position"
name = "gps"

[[sensors]]
sensor_type = "mock"
name = "bench"
handlers = ["csv", "log"]
[sensors.settings]
rate_hz = "20"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(FIELD_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.client.server_address(), "192.168.1.10:50005");
        assert_eq!(bp.server.stream_port, Some(50006));
        assert_eq!(bp.time.mode, TimeMode::Precise);
        assert_eq!(bp.sensors.len(), 2);
        assert_eq!(bp.sensors[1].handlers, vec![HandlerKind::Csv, HandlerKind::Log]);
        assert_eq!(bp.sensors[1].setting::<f64>("rate_hz"), Some(Ok(20.0)));
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(FIELD_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.client.server_host, bp2.client.server_host);
        assert_eq!(bp.sensors.len(), bp2.sensors.len());
        assert_eq!(bp.sensors[0].name, bp2.sensors[0].name);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(FIELD_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.sync, bp2.sync);
        assert_eq!(bp.output.buffer_size, bp2.output.buffer_size);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[sensors]]
sensor_type = "mock"
name = "dup"

[[sensors]]
sensor_type = "mock"
name = "dup"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_infinite_budget_is_an_error() {
        let content = "[lifecycle]\nclosing_budget_s = inf\n";
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(
            err,
            ContractError::ConfigValidation { ref field, .. } if field == "lifecycle.closing_budget_s"
        ));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(FIELD_TOML.as_bytes()).unwrap();

        let bp = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(bp.output.buffer_size, 16);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::load_from_path(Path::new("/nonexistent/field.toml"));
        assert!(matches!(result, Err(ContractError::Io(_))));
    }
}

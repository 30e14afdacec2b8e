//! Sensor identity, lifecycle state and samples
//!
//! Sensors are external collaborators; the core only knows who they are,
//! which lifecycle state they are in, and the opaque samples they emit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Sensor identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorInfo {
    /// Sensor type (e.g. "position", "canon_mcu")
    pub sensor_type: String,

    /// Sensor name; not unique
    pub name: String,

    /// Unique id, assigned in configuration order
    pub id: u32,
}

impl SensorInfo {
    pub fn new(sensor_type: impl Into<String>, name: impl Into<String>, id: u32) -> Self {
        Self {
            sensor_type: sensor_type.into(),
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for SensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.sensor_type, self.name, self.id)
    }
}

/// Sensor lifecycle state
///
/// ```text
/// Created --open ok--> Running <--stop/resume--> Paused
/// Running | Paused --close--> CloseRequested --thread exits--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SensorState {
    Created = 0,
    Opening = 1,
    Running = 2,
    Paused = 3,
    CloseRequested = 4,
    Closed = 5,
}

impl SensorState {
    /// Decode from the atomic representation.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Opening,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::CloseRequested,
            5 => Self::Closed,
            _ => Self::Created,
        }
    }

    /// States in which the sensor owns a live background thread.
    pub fn has_thread(self) -> bool {
        matches!(
            self,
            Self::Opening | Self::Running | Self::Paused | Self::CloseRequested
        )
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Opening => "opening",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::CloseRequested => "close_requested",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Command target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SensorSelector {
    /// Every sensor of a type (`ct`)
    ByType(String),
    /// Every sensor with a name (`cn`); names are not unique
    ByName(String),
    /// The single sensor with an id (`ci`)
    ById(u32),
}

impl SensorSelector {
    /// Wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ByType(_) => "ct",
            Self::ByName(_) => "cn",
            Self::ById(_) => "ci",
        }
    }

    /// Wire target field
    pub fn target(&self) -> String {
        match self {
            Self::ByType(t) => t.clone(),
            Self::ByName(n) => n.clone(),
            Self::ById(id) => id.to_string(),
        }
    }

    /// Build from a wire tag and target field.
    pub fn from_wire(tag: &str, target: &str) -> Result<Self, ContractError> {
        match tag {
            "ct" => Ok(Self::ByType(target.to_string())),
            "cn" => Ok(Self::ByName(target.to_string())),
            "ci" => target.parse::<u32>().map(Self::ById).map_err(|_| {
                ContractError::malformed(tag, format!("'{target}' is not a sensor id"))
            }),
            other => Err(ContractError::UnknownPacket {
                tag: other.to_string(),
            }),
        }
    }

    pub fn matches(&self, info: &SensorInfo) -> bool {
        match self {
            Self::ByType(t) => info.sensor_type == *t,
            Self::ByName(n) => info.name == *n,
            Self::ById(id) => info.id == *id,
        }
    }
}

impl fmt::Display for SensorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.tag(), self.target())
    }
}

/// One field of a sample; handlers format but never interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for SampleValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for SampleValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for SampleValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SampleValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One sample tuple
pub type Sample = Vec<SampleValue>;

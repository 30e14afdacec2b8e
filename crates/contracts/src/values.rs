//! Time, position and orientation values
//!
//! These are the payloads distributed by the control plane and consumed by sensors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// UTC time in seconds.
pub type UtcTime = f64;

/// Frame name used before any real value has arrived.
pub const UNSET_FRAME: &str = "None";

/// A value stamped with the UTC instant it was measured at.
///
/// Consumers compare this stamp against the last one they handled to
/// decide whether a wake-up carried new data.
pub trait Timestamped {
    fn utc_time(&self) -> UtcTime;
}

impl Timestamped for f64 {
    fn utc_time(&self) -> UtcTime {
        *self
    }
}

/// 3D vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Position in a named coordinate frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValue {
    /// UTC time the position was measured
    pub utc_time: UtcTime,

    /// Coordinate frame (e.g. "LLA", "UTM", "ENU")
    pub frame: String,

    /// Coordinates in the frame's axis order
    pub coords: Vector3,

    /// Zone for zoned frames (e.g. "14S")
    pub zone: Option<String>,
}

impl PositionValue {
    pub fn new(
        utc_time: UtcTime,
        frame: impl Into<String>,
        coords: Vector3,
        zone: Option<String>,
    ) -> Self {
        Self {
            utc_time,
            frame: frame.into(),
            coords,
            zone,
        }
    }
}

impl Default for PositionValue {
    fn default() -> Self {
        Self {
            utc_time: 0.0,
            frame: UNSET_FRAME.to_string(),
            coords: Vector3::default(),
            zone: None,
        }
    }
}

impl Timestamped for PositionValue {
    fn utc_time(&self) -> UtcTime {
        self.utc_time
    }
}

/// Rotation axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'x' => Some(Self::X),
            'y' => Some(Self::Y),
            'z' => Some(Self::Z),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
        }
    }
}

/// How the four orientation components are interpreted.
///
/// Encoded on the wire as a 4-character code: `s`/`r` followed by the axis
/// order (`rzyx` is yaw-pitch-roll), or the literal `quat` for `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RotationType {
    /// Static (extrinsic) rotations about fixed axes
    Static([Axis; 3]),
    /// Relative (intrinsic) rotations about the rotated axes
    Relative([Axis; 3]),
    /// Quaternion (x, y, z, w)
    Quaternion,
}

impl Default for RotationType {
    fn default() -> Self {
        Self::Relative([Axis::Z, Axis::Y, Axis::X])
    }
}

impl FromStr for RotationType {
    type Err = ContractError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = code.trim().to_ascii_lowercase();
        if code == "quat" {
            return Ok(Self::Quaternion);
        }

        let invalid = || {
            ContractError::malformed(
                "rotation_type",
                format!("invalid rotation code '{code}'"),
            )
        };

        let chars: Vec<char> = code.chars().collect();
        if chars.len() != 4 {
            return Err(invalid());
        }

        let mut axes = [Axis::X; 3];
        for (slot, c) in axes.iter_mut().zip(&chars[1..]) {
            *slot = Axis::from_char(*c).ok_or_else(invalid)?;
        }
        if axes[0] == axes[1] || axes[1] == axes[2] {
            return Err(invalid());
        }

        match chars[0] {
            's' => Ok(Self::Static(axes)),
            'r' => Ok(Self::Relative(axes)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, axes) = match self {
            Self::Quaternion => return f.write_str("quat"),
            Self::Static(axes) => ('s', axes),
            Self::Relative(axes) => ('r', axes),
        };
        write!(f, "{prefix}")?;
        for axis in axes {
            write!(f, "{}", axis.as_char())?;
        }
        Ok(())
    }
}

impl TryFrom<String> for RotationType {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RotationType> for String {
    fn from(value: RotationType) -> Self {
        value.to_string()
    }
}

/// Orientation in a named coordinate frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationValue {
    /// UTC time the orientation was measured
    pub utc_time: UtcTime,

    /// Coordinate frame the rotation is relative to
    pub frame: String,

    /// Interpretation of `components`
    pub rotation: RotationType,

    /// Rotation components; unused components are 0
    pub components: [f64; 4],
}

impl OrientationValue {
    /// Euler-angle orientation (fourth component unused).
    pub fn euler(
        utc_time: UtcTime,
        frame: impl Into<String>,
        rotation: RotationType,
        angles: [f64; 3],
    ) -> Self {
        Self {
            utc_time,
            frame: frame.into(),
            rotation,
            components: [angles[0], angles[1], angles[2], 0.0],
        }
    }
}

impl Default for OrientationValue {
    fn default() -> Self {
        Self {
            utc_time: 0.0,
            frame: UNSET_FRAME.to_string(),
            rotation: RotationType::default(),
            components: [0.0; 4],
        }
    }
}

impl Timestamped for OrientationValue {
    fn utc_time(&self) -> UtcTime {
        self.utc_time
    }
}

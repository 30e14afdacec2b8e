//! Wire packet codec
//!
//! ASCII, comma-delimited, first field is the tag. One packet per datagram,
//! or one packet per `<...>` frame on stream transports.
//!
//! Decoding trims every field and drops empty ones, so `"t, 12.5 ,"` and
//! `"t,12.5"` are the same packet.

use std::fmt;
use std::str::FromStr;

use crate::{
    ContractError, OrientationValue, PositionValue, RotationType, SensorSelector, UtcTime,
    Vector3, UNSET_FRAME,
};

/// Start-of-frame delimiter on stream transports
pub const FRAME_START: u8 = b'<';

/// End-of-frame delimiter on stream transports
pub const FRAME_END: u8 = b'>';

/// Every packet the control plane exchanges.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `t,utc_time[,time_delay]`
    Time {
        utc_time: UtcTime,
        time_delay: Option<f64>,
    },
    /// `p,utc_time,time_delay,frame,x,y,z,zone`
    Position {
        time_delay: f64,
        position: PositionValue,
    },
    /// `o,utc_time,time_delay,frame,rotation_type,r1,r2,r3,r4`
    Orientation {
        time_delay: f64,
        orientation: OrientationValue,
    },
    /// `sync1,id,utc_time`
    Sync1 { id: u64, utc_time: UtcTime },
    /// `sync2,id,rtt`
    Sync2 { id: u64, rtt: f64 },
    /// Bare integer echoing a `sync1` id
    SyncEcho { id: u64 },
    /// `true` / `false` convergence verdict
    SyncResult(bool),
    /// `sync` (require_sync) or `add`
    Subscribe { require_sync: bool },
    /// `ack`
    Ack,
    /// `ct|cn|ci,target,command`
    Command {
        selector: SensorSelector,
        command: String,
    },
}

impl Packet {
    /// Tag used for logging and metrics labels.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Time { .. } => "t",
            Self::Position { .. } => "p",
            Self::Orientation { .. } => "o",
            Self::Sync1 { .. } => "sync1",
            Self::Sync2 { .. } => "sync2",
            Self::SyncEcho { .. } => "echo",
            Self::SyncResult(_) => "result",
            Self::Subscribe { require_sync: true } => "sync",
            Self::Subscribe { require_sync: false } => "add",
            Self::Ack => "ack",
            Self::Command { selector, .. } => selector.tag(),
        }
    }

    /// Decode one packet from its text form.
    pub fn decode(text: &str) -> Result<Self, ContractError> {
        let fields: Vec<&str> = text
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();

        let Some((&tag, rest)) = fields.split_first() else {
            return Err(ContractError::malformed("", "empty packet"));
        };
        let mut fields = Fields { tag, rest, pos: 0 };

        let packet = match tag {
            "t" => Self::Time {
                utc_time: fields.float()?,
                time_delay: fields.optional_float()?,
            },
            "p" => {
                let utc_time = fields.float()?;
                let time_delay = fields.float()?;
                let frame = fields.text()?.to_string();
                let coords = Vector3::new(fields.float()?, fields.float()?, fields.float()?);
                let zone = fields
                    .optional_text()
                    .filter(|z| !z.eq_ignore_ascii_case(UNSET_FRAME))
                    .map(str::to_string);
                Self::Position {
                    time_delay,
                    position: PositionValue {
                        utc_time,
                        frame,
                        coords,
                        zone,
                    },
                }
            }
            "o" => {
                let utc_time = fields.float()?;
                let time_delay = fields.float()?;
                let frame = fields.text()?.to_string();
                let rotation = fields.text()?.parse::<RotationType>()?;
                let components = [
                    fields.float()?,
                    fields.float()?,
                    fields.float()?,
                    fields.optional_float()?.unwrap_or(0.0),
                ];
                Self::Orientation {
                    time_delay,
                    orientation: OrientationValue {
                        utc_time,
                        frame,
                        rotation,
                        components,
                    },
                }
            }
            "sync1" => Self::Sync1 {
                id: fields.int()?,
                utc_time: fields.float()?,
            },
            "sync2" => Self::Sync2 {
                id: fields.int()?,
                rtt: fields.float()?,
            },
            "sync" => Self::Subscribe { require_sync: true },
            "add" => Self::Subscribe {
                require_sync: false,
            },
            "ack" => Self::Ack,
            "true" => Self::SyncResult(true),
            "false" => Self::SyncResult(false),
            "ct" | "cn" | "ci" => {
                // Commands may contain commas and empty fields, so they are
                // cut from the raw text rather than the filtered fields.
                let mut raw = text
                    .trim_start_matches(|c: char| c == ',' || c.is_whitespace())
                    .splitn(3, ',')
                    .skip(1)
                    .map(str::trim);
                let target = raw
                    .next()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ContractError::malformed(tag, "missing target"))?;
                let selector = SensorSelector::from_wire(tag, target)?;
                let command = raw.next().unwrap_or_default().to_string();
                if command.is_empty() {
                    return Err(ContractError::malformed(tag, "missing command"));
                }
                Self::Command { selector, command }
            }
            other => match other.parse::<u64>() {
                Ok(id) if rest.is_empty() => Self::SyncEcho { id },
                _ => {
                    return Err(ContractError::UnknownPacket {
                        tag: other.to_string(),
                    })
                }
            },
        };

        Ok(packet)
    }

    /// Encode into the text form used for datagrams.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Encode into a `<...>` frame for stream transports.
    pub fn to_frame(&self) -> String {
        format!("<{self}>")
    }
}

impl FromStr for Packet {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time {
                utc_time,
                time_delay: Some(delay),
            } => write!(f, "t,{utc_time},{delay}"),
            Self::Time {
                utc_time,
                time_delay: None,
            } => write!(f, "t,{utc_time}"),
            Self::Position {
                time_delay,
                position: p,
            } => write!(
                f,
                "p,{},{},{},{},{},{},{}",
                p.utc_time,
                time_delay,
                p.frame,
                p.coords.x,
                p.coords.y,
                p.coords.z,
                p.zone.as_deref().unwrap_or(UNSET_FRAME)
            ),
            Self::Orientation {
                time_delay,
                orientation: o,
            } => {
                let [r1, r2, r3, r4] = o.components;
                write!(
                    f,
                    "o,{},{},{},{},{r1},{r2},{r3},{r4}",
                    o.utc_time, time_delay, o.frame, o.rotation
                )
            }
            Self::Sync1 { id, utc_time } => write!(f, "sync1,{id},{utc_time}"),
            Self::Sync2 { id, rtt } => write!(f, "sync2,{id},{rtt}"),
            Self::SyncEcho { id } => write!(f, "{id}"),
            Self::SyncResult(ok) => write!(f, "{ok}"),
            Self::Subscribe { require_sync } => {
                f.write_str(if *require_sync { "sync" } else { "add" })
            }
            Self::Ack => f.write_str("ack"),
            Self::Command { selector, command } => {
                write!(f, "{},{},{command}", selector.tag(), selector.target())
            }
        }
    }
}

/// Cursor over the fields following the tag.
struct Fields<'a> {
    tag: &'a str,
    rest: &'a [&'a str],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn optional_text(&mut self) -> Option<&'a str> {
        let field = self.rest.get(self.pos).copied();
        if field.is_some() {
            self.pos += 1;
        }
        field
    }

    fn text(&mut self) -> Result<&'a str, ContractError> {
        let index = self.pos + 1;
        self.optional_text().ok_or_else(|| {
            ContractError::malformed(self.tag, format!("missing field {index}"))
        })
    }

    fn float(&mut self) -> Result<f64, ContractError> {
        let raw = self.text()?;
        raw.parse::<f64>()
            .map_err(|_| ContractError::malformed(self.tag, format!("'{raw}' is not a number")))
    }

    fn optional_float(&mut self) -> Result<Option<f64>, ContractError> {
        match self.optional_text() {
            None => Ok(None),
            Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                ContractError::malformed(self.tag, format!("'{raw}' is not a number"))
            }),
        }
    }

    fn int(&mut self) -> Result<u64, ContractError> {
        let raw = self.text()?;
        raw.parse::<u64>()
            .map_err(|_| ContractError::malformed(self.tag, format!("'{raw}' is not an id")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Axis;

    #[test]
    fn test_decode_time_with_and_without_delay() {
        assert_eq!(
            Packet::decode("t,100.5").unwrap(),
            Packet::Time {
                utc_time: 100.5,
                time_delay: None
            }
        );
        assert_eq!(
            Packet::decode(" t , 100.5 , 0.25 ,").unwrap(),
            Packet::Time {
                utc_time: 100.5,
                time_delay: Some(0.25)
            }
        );
    }

    #[test]
    fn test_decode_position_zone() {
        let packet = Packet::decode("p,10,0.1,UTM,1,2,3,14S").unwrap();
        let Packet::Position {
            time_delay,
            position,
        } = packet
        else {
            panic!("expected position");
        };
        assert_eq!(time_delay, 0.1);
        assert_eq!(position.frame, "UTM");
        assert_eq!(position.coords, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(position.zone.as_deref(), Some("14S"));

        let Packet::Position { position, .. } =
            Packet::decode("p,10,0.1,LLA,1,2,3,None").unwrap()
        else {
            panic!("expected position");
        };
        assert_eq!(position.zone, None);
    }

    #[test]
    fn test_position_encodes_missing_zone_as_none() {
        let packet = Packet::Position {
            time_delay: 0.5,
            position: PositionValue::new(10.0, "ENU", Vector3::new(1.0, 2.0, 3.0), None),
        };
        assert_eq!(packet.encode(), "p,10,0.5,ENU,1,2,3,None");
    }

    #[test]
    fn test_decode_orientation_default_fourth_component() {
        let Packet::Orientation { orientation, .. } =
            Packet::decode("o,10,0.1,ENU,rzyx,0.1,0.2,0.3").unwrap()
        else {
            panic!("expected orientation");
        };
        assert_eq!(
            orientation.rotation,
            RotationType::Relative([Axis::Z, Axis::Y, Axis::X])
        );
        assert_eq!(orientation.components, [0.1, 0.2, 0.3, 0.0]);
    }

    #[test]
    fn test_sync_packets() {
        assert_eq!(
            Packet::decode("sync1,3,100.25").unwrap(),
            Packet::Sync1 {
                id: 3,
                utc_time: 100.25
            }
        );
        assert_eq!(
            Packet::decode("sync2,3,0.02").unwrap(),
            Packet::Sync2 { id: 3, rtt: 0.02 }
        );
        assert_eq!(Packet::decode("7").unwrap(), Packet::SyncEcho { id: 7 });
        assert_eq!(Packet::SyncResult(true).encode(), "true");
        assert_eq!(
            Packet::decode("false").unwrap(),
            Packet::SyncResult(false)
        );
    }

    #[test]
    fn test_session_packets() {
        assert_eq!(
            Packet::decode("sync").unwrap(),
            Packet::Subscribe { require_sync: true }
        );
        assert_eq!(Packet::Subscribe { require_sync: false }.encode(), "add");
        assert_eq!(Packet::decode("ack").unwrap(), Packet::Ack);
    }

    #[test]
    fn test_command_keeps_commas() {
        let packet = Packet::decode("cn,cam1,trigger,fast").unwrap();
        assert_eq!(
            packet,
            Packet::Command {
                selector: SensorSelector::ByName("cam1".into()),
                command: "trigger,fast".into()
            }
        );
        assert_eq!(packet.to_frame(), "<cn,cam1,trigger,fast>");
        assert!(Packet::decode("ci,notanumber,go").is_err());
    }

    #[test]
    fn test_command_keeps_empty_fields() {
        let packet = Packet::decode("ct,cam,a,,b").unwrap();
        assert_eq!(
            packet,
            Packet::Command {
                selector: SensorSelector::ByType("cam".into()),
                command: "a,,b".into()
            }
        );
        assert_eq!(packet.encode(), "ct,cam,a,,b");
        assert!(Packet::decode("ct,,go").is_err());
        assert!(Packet::decode("ct,cam").is_err());
    }

    #[test]
    fn test_unknown_and_malformed() {
        let err = Packet::decode("zz,1,2").unwrap_err();
        assert!(matches!(err, ContractError::UnknownPacket { .. }));
        assert!(err.is_wire_error());

        let err = Packet::decode("p,10,0.1,UTM,1").unwrap_err();
        assert!(matches!(err, ContractError::MalformedPacket { .. }));

        assert!(Packet::decode("t,abc").is_err());
        assert!(Packet::decode("  ,  ").is_err());
    }
}

//! Wire value types for the scsynth control protocol.
//!
//! Client code builds and inspects `WireMessage`/`WireBundle` values and never
//! touches `rosc` types directly; conversion to OSC happens once, at the
//! transport boundary. This keeps the decoder and scheduler testable without
//! any socket or codec in the loop.

use std::fmt;

/// Offset between the NTP epoch (1900) and the UNIX epoch (1970), in seconds.
/// OSC timetags count from the NTP epoch.
pub const NTP_UNIX_EPOCH_DELTA: u64 = 2_208_988_800;

/// A loosely-typed positional argument, mirroring the subset of OSC types
/// scsynth actually exchanges.
#[derive(Debug, Clone, PartialEq)]
pub enum WireArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
}

impl WireArg {
    /// Convert from a decoded `rosc` argument. Returns `None` for OSC types
    /// outside the scsynth subset (doubles, arrays, midi, ...).
    pub fn from_osc(arg: rosc::OscType) -> Option<WireArg> {
        match arg {
            rosc::OscType::Int(v) => Some(WireArg::Int(v)),
            rosc::OscType::Float(v) => Some(WireArg::Float(v)),
            rosc::OscType::String(v) => Some(WireArg::Str(v)),
            rosc::OscType::Blob(v) => Some(WireArg::Blob(v)),
            _ => None,
        }
    }
}

impl From<WireArg> for rosc::OscType {
    fn from(arg: WireArg) -> rosc::OscType {
        match arg {
            WireArg::Int(v) => rosc::OscType::Int(v),
            WireArg::Float(v) => rosc::OscType::Float(v),
            WireArg::Str(v) => rosc::OscType::String(v),
            WireArg::Blob(v) => rosc::OscType::Blob(v),
        }
    }
}

impl From<i32> for WireArg {
    fn from(v: i32) -> Self {
        WireArg::Int(v)
    }
}

impl From<f32> for WireArg {
    fn from(v: f32) -> Self {
        WireArg::Float(v)
    }
}

impl From<&str> for WireArg {
    fn from(v: &str) -> Self {
        WireArg::Str(v.to_string())
    }
}

impl From<String> for WireArg {
    fn from(v: String) -> Self {
        WireArg::Str(v)
    }
}

/// One protocol command or event: an address tag plus positional arguments.
/// Value semantics; equality is by content.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub addr: String,
    pub args: Vec<WireArg>,
}

impl WireMessage {
    pub fn new(addr: impl Into<String>, args: Vec<WireArg>) -> Self {
        Self {
            addr: addr.into(),
            args,
        }
    }

    /// Convert an inbound `rosc` message. Fails if any argument falls outside
    /// the scsynth type subset.
    pub fn from_osc(message: rosc::OscMessage) -> Result<Self, UnsupportedArg> {
        let addr = message.addr;
        let mut args = Vec::with_capacity(message.args.len());
        for arg in message.args {
            match WireArg::from_osc(arg) {
                Some(arg) => args.push(arg),
                None => return Err(UnsupportedArg { addr }),
            }
        }
        Ok(Self { addr, args })
    }
}

impl From<WireMessage> for rosc::OscMessage {
    fn from(message: WireMessage) -> rosc::OscMessage {
        rosc::OscMessage {
            addr: message.addr,
            args: message.args.into_iter().map(rosc::OscType::from).collect(),
        }
    }
}

/// An inbound message carried an OSC argument type scsynth never sends.
#[derive(Debug, Clone)]
pub struct UnsupportedArg {
    pub addr: String,
}

impl fmt::Display for UnsupportedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported OSC argument type in {}", self.addr)
    }
}

impl std::error::Error for UnsupportedArg {}

/// A fixed-point NTP-era timetag: whole seconds plus a 1/2^32 fraction.
/// Ordered and hashable so it can key scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    /// Build a timetag from wall-clock seconds since the UNIX epoch.
    pub fn from_unix_secs(unix_secs: f64) -> Self {
        let ntp_secs = unix_secs + NTP_UNIX_EPOCH_DELTA as f64;
        let whole = ntp_secs.floor();
        let fraction = ((ntp_secs - whole) * (1u64 << 32) as f64) as u32;
        Self {
            seconds: whole as u32,
            fraction,
        }
    }

    /// Seconds since the UNIX epoch as a float.
    pub fn as_unix_secs(self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / (1u64 << 32) as f64
            - NTP_UNIX_EPOCH_DELTA as f64
    }
}

impl From<TimeTag> for rosc::OscTime {
    fn from(tag: TimeTag) -> rosc::OscTime {
        rosc::OscTime {
            seconds: tag.seconds,
            fractional: tag.fraction,
        }
    }
}

impl From<rosc::OscTime> for TimeTag {
    fn from(time: rosc::OscTime) -> TimeTag {
        TimeTag {
            seconds: time.seconds,
            fraction: time.fractional,
        }
    }
}

/// When a bundle should execute, relative to the engine's clock.
///
/// `Immediately` is a distinct scheduling key: it never compares equal to any
/// numeric tag, and the scheduler never merges it with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    Immediately,
    At(TimeTag),
}

impl Timestamp {
    /// The OSC timetag this timestamp encodes as. `Immediately` maps to the
    /// protocol's immediate tag `(0, 1)`.
    pub fn to_osc_time(self) -> rosc::OscTime {
        match self {
            Timestamp::Immediately => rosc::OscTime {
                seconds: 0,
                fractional: 1,
            },
            Timestamp::At(tag) => tag.into(),
        }
    }
}

/// A timestamped group of messages (and/or nested bundles) delivered
/// atomically relative to the engine's scheduling clock.
#[derive(Debug, Clone, PartialEq)]
pub struct WireBundle {
    pub timestamp: Timestamp,
    pub contents: Vec<WirePacket>,
}

impl WireBundle {
    pub fn new(timestamp: Timestamp, contents: Vec<WirePacket>) -> Self {
        Self {
            timestamp,
            contents,
        }
    }
}

/// Either a flat message or a bundle. Nested bundles may only appear inside
/// another bundle's contents.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePacket {
    Message(WireMessage),
    Bundle(WireBundle),
}

impl WirePacket {
    pub fn into_osc(self) -> rosc::OscPacket {
        match self {
            WirePacket::Message(message) => rosc::OscPacket::Message(message.into()),
            WirePacket::Bundle(bundle) => rosc::OscPacket::Bundle(rosc::OscBundle {
                timetag: bundle.timestamp.to_osc_time(),
                content: bundle.contents.into_iter().map(WirePacket::into_osc).collect(),
            }),
        }
    }
}

impl From<WireMessage> for WirePacket {
    fn from(message: WireMessage) -> WirePacket {
        WirePacket::Message(message)
    }
}

impl From<WireBundle> for WirePacket {
    fn from(bundle: WireBundle) -> WirePacket {
        WirePacket::Bundle(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timetag_roundtrips_unix_seconds() {
        let tag = TimeTag::from_unix_secs(1_700_000_000.25);
        let back = tag.as_unix_secs();
        assert!((back - 1_700_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn immediate_timestamp_encodes_as_zero_one() {
        let time = Timestamp::Immediately.to_osc_time();
        assert_eq!(time.seconds, 0);
        assert_eq!(time.fractional, 1);
    }

    #[test]
    fn immediate_never_equals_numeric_tag() {
        let numeric = Timestamp::At(TimeTag {
            seconds: 0,
            fraction: 1,
        });
        assert_ne!(Timestamp::Immediately, numeric);
    }

    #[test]
    fn message_converts_to_osc_and_back() {
        let message = WireMessage::new(
            "/s_new",
            vec![
                WireArg::from("default"),
                WireArg::Int(1000),
                WireArg::Int(0),
                WireArg::Int(1),
            ],
        );
        let osc: rosc::OscMessage = message.clone().into();
        let back = WireMessage::from_osc(osc).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn exotic_osc_argument_is_rejected() {
        let osc = rosc::OscMessage {
            addr: "/status.reply".to_string(),
            args: vec![rosc::OscType::Double(1.0)],
        };
        assert!(WireMessage::from_osc(osc).is_err());
    }

    #[test]
    fn nested_bundle_encodes_inner_timetag() {
        let inner = WireBundle::new(
            Timestamp::At(TimeTag {
                seconds: 10,
                fraction: 0,
            }),
            vec![WireMessage::new("/n_free", vec![WireArg::Int(1000)]).into()],
        );
        let outer = WireBundle::new(Timestamp::Immediately, vec![inner.into()]);
        match WirePacket::Bundle(outer).into_osc() {
            rosc::OscPacket::Bundle(bundle) => {
                assert_eq!(bundle.content.len(), 1);
                match &bundle.content[0] {
                    rosc::OscPacket::Bundle(inner) => assert_eq!(inner.timetag.seconds, 10),
                    other => panic!("expected nested bundle, got {:?}", other),
                }
            }
            other => panic!("expected bundle, got {:?}", other),
        }
    }
}

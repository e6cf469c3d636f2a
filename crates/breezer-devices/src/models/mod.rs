/*!
 * Command/response registry.
 *
 * Every supported model is described by a [`ModelCodec`]: how it frames
 * messages, which characteristics it uses, the byte layout of its commands
 * and a status table mapping parameters to byte offsets and bit positions.
 * Status decoding is table driven; see [`Field`].
 */
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use breezer_core::config::FramingConfig;
use breezer_core::types::ValueMap;

use crate::error::{DeviceError, Result};
use crate::frame::{Framing, Header};

pub mod lite;
pub mod s3;
pub mod s4;
pub mod state;

pub use state::{on_off, BreezerState, Mode, Settings, DEFAULT_MODES};

/// Seconds per day; run-time counters are reported in seconds
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Supported breezer models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    /// Tion S3
    S3,
    /// Tion Lite
    Lite,
    /// Tion S4
    S4,
}

impl Model {
    /// All supported models
    pub const ALL: [Model; 3] = [Model::S3, Model::Lite, Model::S4];

    /// Name used in status mappings
    pub fn name(&self) -> &'static str {
        match self {
            Model::S3 => "S3",
            Model::Lite => "Lite",
            Model::S4 => "S4",
        }
    }

    /// Codec for this model
    pub fn codec(&self) -> &'static dyn ModelCodec {
        codec_for(*self)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Model {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let name = name.strip_prefix("Tion").unwrap_or(name);
        Model::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| DeviceError::UnsupportedModel(s.to_string()))
    }
}

/// GATT characteristics a model talks through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristics {
    /// Primary service
    pub service: Uuid,
    /// Characteristic commands are written to
    pub write: Uuid,
    /// Characteristic replies are notified on
    pub notify: Uuid,
}

/// An encoded command ready for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Message bytes; the first byte is a placeholder on segmented models
    pub message: Vec<u8>,
    /// Request id the reply must echo, for models with headers
    pub request_id: Option<[u8; 4]>,
}

impl Request {
    /// A request whose reply carries no header
    pub fn raw(message: Vec<u8>) -> Self {
        Self {
            message,
            request_id: None,
        }
    }

    /// A request whose reply must echo `request_id`
    pub fn correlated(message: Vec<u8>, request_id: [u8; 4]) -> Self {
        Self {
            message,
            request_id: Some(request_id),
        }
    }

    /// Whether `reply` answers this request
    pub fn is_answered_by(&self, reply: &[u8]) -> bool {
        match self.request_id {
            None => true,
            Some(id) => Header::parse(reply)
                .map(|header| header.request_id == id)
                .unwrap_or(false),
        }
    }
}

/// Parameters a status table can fill in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Power
    State,
    /// Heater
    Heater,
    /// Sound
    Sound,
    /// Light
    Light,
    /// Timer
    Timer,
    /// Filter replacement flag
    FilterChangeRequired,
    /// CO2 automatic control
    Co2AutoControl,
    /// Heater present
    HaveHeater,
    /// Mode code
    Mode,
    /// Target temperature
    TargetTemp,
    /// Fan speed
    FanSpeed,
    /// Incoming air temperature
    InTemp,
    /// Outgoing air temperature
    OutTemp,
    /// Electronics temperature
    ElectronicTemp,
    /// Electronics run time
    ElectronicWorkTime,
    /// Remaining filter life
    FilterRemain,
    /// Device run time
    DeviceWorkTime,
    /// Error code
    ErrorCode,
    /// Productivity
    Productivity,
    /// Device clock
    DeviceTime,
    /// Firmware version
    FirmwareVersion,
}

/// Where and how a parameter is stored in a status body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Plain byte
    Byte(usize),
    /// Low four bits of a byte
    LowNibble(usize),
    /// High four bits of a byte
    HighNibble(usize),
    /// Flag set when the bit is 1
    Bit(usize, u8),
    /// Flag set when the bit is 0
    ClearBit(usize, u8),
    /// Signed temperature byte
    Temperature(usize),
    /// Little-endian seconds counter converted to days
    Days {
        /// First byte
        start: usize,
        /// Counter width in bytes
        len: usize,
    },
    /// Little-endian u16
    U16Le(usize),
    /// Two bytes rendered `hours:minutes`
    Clock(usize),
    /// Little-endian u16 rendered as four hex digits
    Firmware(usize),
}

/// A value read from a [`Field`]
#[derive(Debug, Clone, PartialEq)]
enum Reading {
    Flag(bool),
    Int(i64),
    Days(f64),
    Text(String),
}

impl Field {
    /// Highest byte index the field touches
    pub fn last_index(&self) -> usize {
        match *self {
            Field::Byte(i)
            | Field::LowNibble(i)
            | Field::HighNibble(i)
            | Field::Bit(i, _)
            | Field::ClearBit(i, _)
            | Field::Temperature(i) => i,
            Field::Days { start, len } => start + len.max(1) - 1,
            Field::U16Le(i) | Field::Clock(i) | Field::Firmware(i) => i + 1,
        }
    }

    // Callers check `last_index` against the body length first.
    fn read(&self, raw: &[u8]) -> Reading {
        match *self {
            Field::Byte(i) => Reading::Int(i64::from(raw[i])),
            Field::LowNibble(i) => Reading::Int(i64::from(raw[i] & 0x0f)),
            Field::HighNibble(i) => Reading::Int(i64::from(raw[i] >> 4)),
            Field::Bit(i, bit) => Reading::Flag((raw[i] >> bit) & 1 == 1),
            Field::ClearBit(i, bit) => Reading::Flag((raw[i] >> bit) & 1 == 0),
            Field::Temperature(i) => Reading::Int(i64::from(decode_temperature(raw[i]))),
            Field::Days { start, len } => {
                Reading::Days(le_counter(&raw[start..start + len]) as f64 / SECONDS_PER_DAY)
            }
            Field::U16Le(i) => Reading::Int(i64::from(u16::from_le_bytes([raw[i], raw[i + 1]]))),
            Field::Clock(i) => Reading::Text(format!("{}:{}", raw[i], raw[i + 1])),
            Field::Firmware(i) => Reading::Text(format!("{:02x}{:02x}", raw[i + 1], raw[i])),
        }
    }
}

/// Decode a temperature byte: values from 0x80 up are negative
pub fn decode_temperature(raw: u8) -> i16 {
    if raw < 0x80 {
        i16::from(raw)
    } else {
        i16::from(raw) - 0x100
    }
}

/// Unsigned little-endian integer of up to eight bytes
pub fn le_counter(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Apply a status table to a body
///
/// The state is only updated when every field is in range; a short body
/// yields [`DeviceError::Decode`] naming the first missing index.
pub fn decode_layout(
    model: Model,
    layout: &[(Param, Field)],
    modes: &[Mode],
    raw: &[u8],
    state: &mut BreezerState,
) -> Result<()> {
    if let Some(index) = layout
        .iter()
        .map(|(_, field)| field.last_index())
        .filter(|index| *index >= raw.len())
        .min()
    {
        return Err(DeviceError::Decode {
            model: model.to_string(),
            index,
            raw: raw.to_vec(),
        });
    }

    let mut next = state.clone();
    for (param, field) in layout {
        store(&mut next, *param, field.read(raw), modes);
    }
    *state = next;
    Ok(())
}

fn store(state: &mut BreezerState, param: Param, reading: Reading, modes: &[Mode]) {
    let flag = matches!(reading, Reading::Flag(true));
    let int = match reading {
        Reading::Int(i) => i,
        _ => 0,
    };
    let byte = u8::try_from(int).unwrap_or(u8::MAX);
    let days = match reading {
        Reading::Days(d) => d,
        Reading::Int(i) => i as f64,
        _ => 0.0,
    };
    let text = match reading {
        Reading::Text(t) => Some(t),
        _ => None,
    };

    match param {
        Param::State => state.state = flag,
        Param::Heater => state.heater = flag,
        Param::Sound => state.sound = flag,
        Param::Light => state.light = flag,
        Param::Timer => state.timer = flag,
        Param::FilterChangeRequired => state.filter_change_required = flag,
        Param::Co2AutoControl => state.co2_auto_control = flag,
        Param::HaveHeater => state.have_heater = flag,
        Param::Mode => state.mode = Mode::decode(modes, byte),
        Param::TargetTemp => state.target_temp = byte,
        Param::FanSpeed => state.fan_speed = byte,
        Param::InTemp => state.in_temp = int as i16,
        Param::OutTemp => state.out_temp = int as i16,
        Param::ElectronicTemp => state.electronic_temp = byte,
        Param::ElectronicWorkTime => state.electronic_work_time = days,
        Param::FilterRemain => state.filter_remain = days,
        Param::DeviceWorkTime => state.device_work_time = days,
        Param::ErrorCode => state.error_code = byte,
        Param::Productivity => state.productivity = byte,
        Param::DeviceTime => state.device_time = text,
        Param::FirmwareVersion => state.fw_version = text,
    }
}

/// Per-model wire contract
pub trait ModelCodec: Send + Sync + fmt::Debug {
    /// The model this codec speaks
    fn model(&self) -> Model;

    /// GATT characteristics
    fn characteristics(&self) -> Characteristics;

    /// How messages are put on the air
    fn framing(&self, config: &FramingConfig) -> Framing;

    /// Mode code table
    fn modes(&self) -> &'static [Mode] {
        DEFAULT_MODES
    }

    /// Status table applied to the body of a status reply
    fn status_layout(&self) -> &'static [(Param, Field)];

    /// Command requesting the current status
    fn status_request(&self) -> Request;

    /// Command writing `state` to the device
    fn set_request(&self, state: &BreezerState) -> Request;

    /// Model-specific pairing command, if the model needs one
    fn pair_request(&self) -> Option<Request> {
        None
    }

    /// Status body of a complete reply
    fn status_body(&self, reply: &Bytes) -> Result<Bytes>;

    /// Decode a complete status reply into `state`
    fn decode(&self, reply: &Bytes, state: &mut BreezerState) -> Result<()> {
        let body = self.status_body(reply)?;
        decode_layout(self.model(), self.status_layout(), self.modes(), &body, state)
    }

    /// Model-specific keys of the status mapping
    fn extras(&self, state: &BreezerState) -> ValueMap;

    /// A recorded status reply, as a message with a placeholder first byte
    /// on segmented models
    fn sample_response(&self) -> Vec<u8>;

    /// Full status mapping: common keys plus model-specific ones
    fn status_map(&self, state: &BreezerState) -> ValueMap {
        let mut map = state.common_map(self.model().name());
        map.extend(self.extras(state));
        map
    }
}

static S3_CODEC: s3::S3Codec = s3::S3Codec;
static LITE_CODEC: lite::LiteCodec = lite::LiteCodec;
static S4_CODEC: s4::S4Codec = s4::S4Codec;

/// Look up the codec of a model
pub fn codec_for(model: Model) -> &'static dyn ModelCodec {
    match model {
        Model::S3 => &S3_CODEC,
        Model::Lite => &LITE_CODEC,
        Model::S4 => &S4_CODEC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_temperature() {
        assert_eq!(decode_temperature(0x09), 9);
        assert_eq!(decode_temperature(0x7f), 127);
        assert_eq!(decode_temperature(0x80), -128);
        assert_eq!(decode_temperature(0xff), -1);
    }

    #[test]
    fn test_le_counter() {
        assert_eq!(le_counter(&[0x80, 0x8e, 0x05]), 0x058e80);
        assert_eq!(le_counter(&[0x8f, 0x00]), 143);
        assert_eq!(le_counter(&[]), 0);
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("S3".parse::<Model>().unwrap(), Model::S3);
        assert_eq!("lite".parse::<Model>().unwrap(), Model::Lite);
        assert_eq!("TionS4".parse::<Model>().unwrap(), Model::S4);
        assert!(matches!(
            "S5".parse::<Model>(),
            Err(DeviceError::UnsupportedModel(name)) if name == "S5"
        ));
    }

    #[test]
    fn test_registry_covers_every_model() {
        for model in Model::ALL {
            assert_eq!(codec_for(model).model(), model);
            assert_eq!(model.codec().model(), model);
        }
    }

    #[test]
    fn test_field_reads() {
        let raw = [0b1010_0101u8, 0xff, 0x34, 0x12];
        assert_eq!(Field::LowNibble(0).read(&raw), Reading::Int(5));
        assert_eq!(Field::HighNibble(0).read(&raw), Reading::Int(10));
        assert_eq!(Field::Bit(0, 2).read(&raw), Reading::Flag(true));
        assert_eq!(Field::ClearBit(0, 1).read(&raw), Reading::Flag(true));
        assert_eq!(Field::Temperature(1).read(&raw), Reading::Int(-1));
        assert_eq!(Field::U16Le(2).read(&raw), Reading::Int(0x1234));
        assert_eq!(Field::Firmware(2).read(&raw), Reading::Text("1234".into()));
        assert_eq!(Field::Clock(2).read(&raw), Reading::Text("52:18".into()));
    }

    #[test]
    fn test_short_body_reports_first_missing_index() {
        const LAYOUT: &[(Param, Field)] = &[
            (Param::State, Field::Bit(0, 0)),
            (Param::FilterRemain, Field::Days { start: 4, len: 4 }),
            (Param::ErrorCode, Field::Byte(9)),
        ];
        let mut state = BreezerState::default();

        let err = decode_layout(Model::S4, LAYOUT, DEFAULT_MODES, &[1, 0, 0, 0, 0], &mut state)
            .unwrap_err();
        match err {
            DeviceError::Decode { model, index, raw } => {
                assert_eq!(model, "S4");
                assert_eq!(index, 7);
                assert_eq!(raw, vec![1, 0, 0, 0, 0]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Nothing was applied
        assert!(!state.state);
    }

    #[test]
    fn test_request_correlation() {
        let request = Request::correlated(vec![0x00], [1, 2, 3, 4]);
        let reply = [0x10, 0x00, 0x3a, 0x00, 0x31, 0x32, 1, 2, 3, 4, 0, 0, 0, 0, 0xbb, 0xaa];
        let stale = [0x10, 0x00, 0x3a, 0x00, 0x31, 0x32, 9, 9, 9, 9, 0, 0, 0, 0, 0xbb, 0xaa];

        assert!(request.is_answered_by(&reply));
        assert!(!request.is_answered_by(&stale));
        assert!(!request.is_answered_by(&[0x01]));
        assert!(Request::raw(vec![0x3d]).is_answered_by(&[0xb3]));
    }
}

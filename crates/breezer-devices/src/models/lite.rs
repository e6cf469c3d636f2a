/*!
 * Tion Lite.
 *
 * The Lite and the S4 share the segmented, header-carrying message format
 * (see [`crate::frame::Envelope`]) and the same GATT service.
 */
use bytes::Bytes;
use uuid::Uuid;

use breezer_core::config::FramingConfig;
use breezer_core::types::ValueMap;

use super::{on_off, BreezerState, Characteristics, Field, Model, ModelCodec, Param, Request};
use crate::error::Result;
use crate::frame::{Envelope, FrameCodec, Framing};

/// Characteristics shared by the Lite family
pub const CHARACTERISTICS: Characteristics = Characteristics {
    service: Uuid::from_u128(0x98f00001_3788_83ea_453e_f52244709ddb),
    write: Uuid::from_u128(0x98f00002_3788_83ea_453e_f52244709ddb),
    notify: Uuid::from_u128(0x98f00003_3788_83ea_453e_f52244709ddb),
};

const GET_COMMAND: [u8; 2] = [0x32, 0x12];
const SET_COMMAND: [u8; 2] = [0x30, 0x12];

const GET_FLAG: u8 = 0x02;
const GET_REQUEST_ID: [u8; 4] = [0x0d, 0xd7, 0x1f, 0x8f];
const GET_SEQUENCE: [u8; 4] = [0x48, 0xd3, 0xc3, 0x1a];

const PRESETS: [u8; 6] = [0x0a, 0x14, 0x19, 0x02, 0x04, 0x06];

const STATUS_LAYOUT: &[(Param, Field)] = &[
    (Param::State, Field::Bit(0, 0)),
    (Param::Sound, Field::Bit(0, 1)),
    (Param::Light, Field::Bit(0, 2)),
    (Param::FilterChangeRequired, Field::Bit(0, 4)),
    (Param::Co2AutoControl, Field::Bit(0, 5)),
    (Param::Heater, Field::Bit(0, 6)),
    (Param::HaveHeater, Field::Bit(0, 7)),
    (Param::Mode, Field::Byte(2)),
    (Param::TargetTemp, Field::Byte(3)),
    (Param::FanSpeed, Field::Byte(4)),
    (Param::InTemp, Field::Temperature(5)),
    (Param::OutTemp, Field::Temperature(6)),
    (Param::ElectronicTemp, Field::Byte(7)),
    (Param::ElectronicWorkTime, Field::Days { start: 8, len: 3 }),
    (Param::FilterRemain, Field::Days { start: 16, len: 4 }),
    (Param::DeviceWorkTime, Field::Days { start: 20, len: 4 }),
    (Param::ErrorCode, Field::Byte(28)),
];

/// Status reply recorded from a device, as received frame by frame
pub const SAMPLE_FRAMES: [&[u8]; 4] = [
    &[
        0x00, 0x49, 0x00, 0x3a, 0x4e, 0x31, 0x12, 0x0d, 0xd7, 0x1f, 0x8f, 0xbf, 0xc9, 0x40, 0x37,
        0xcf, 0xd8, 0x02, 0x0f, 0x04,
    ],
    &[
        0x40, 0x09, 0x0f, 0x1a, 0x80, 0x8e, 0x05, 0x00, 0xe9, 0x8b, 0x05, 0x00, 0x17, 0xc2, 0xe7,
        0x00, 0x26, 0x1b, 0x18, 0x00,
    ],
    &[
        0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x04,
        0x02, 0x00, 0x00, 0x00, 0x00,
    ],
    &[
        0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x14, 0x19, 0x02, 0x04, 0x06, 0x06, 0x18, 0x00,
        0xb5, 0xad,
    ],
];

/// Body of a Lite-family reply
pub(crate) fn envelope_body(reply: &Bytes) -> Result<Bytes> {
    Ok(Envelope::parse(reply)?.body)
}

/// Codec for the Lite
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteCodec;

impl LiteCodec {
    fn state_byte(state: &BreezerState) -> u8 {
        u8::from(state.state)
            | u8::from(state.sound) << 1
            | u8::from(state.light) << 2
            | u8::from(state.heater) << 4
    }
}

impl ModelCodec for LiteCodec {
    fn model(&self) -> Model {
        Model::Lite
    }

    fn characteristics(&self) -> Characteristics {
        CHARACTERISTICS
    }

    fn framing(&self, config: &FramingConfig) -> Framing {
        Framing::Segmented(FrameCodec::from_config(config))
    }

    fn status_layout(&self) -> &'static [(Param, Field)] {
        STATUS_LAYOUT
    }

    fn status_request(&self) -> Request {
        Request::correlated(
            Envelope::build(GET_FLAG, GET_COMMAND, GET_REQUEST_ID, GET_SEQUENCE, &[]),
            GET_REQUEST_ID,
        )
    }

    fn set_request(&self, state: &BreezerState) -> Request {
        let request_id: [u8; 4] = rand::random();
        let target_byte = if state.target_temp > 0 || state.fan_speed > 0 {
            0x02
        } else {
            0x01
        };

        let mut body = vec![
            Self::state_byte(state),
            0x00,
            target_byte,
            state.target_temp,
            state.fan_speed,
        ];
        body.extend_from_slice(&PRESETS);
        body.extend_from_slice(&[0x60, 0x00, 0x00]);

        Request::correlated(
            Envelope::build(rand::random(), SET_COMMAND, request_id, rand::random(), &body),
            request_id,
        )
    }

    fn status_body(&self, reply: &Bytes) -> Result<Bytes> {
        envelope_body(reply)
    }

    fn extras(&self, state: &BreezerState) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("code".into(), 200.into());
        map.insert("device_work_time".into(), state.device_work_time.into());
        map.insert("electronic_work_time".into(), state.electronic_work_time.into());
        map.insert("electronic_temp".into(), state.electronic_temp.into());
        map.insert("co2_auto_control".into(), on_off(state.co2_auto_control).into());
        map.insert(
            "filter_change_required".into(),
            on_off(state.filter_change_required).into(),
        );
        map.insert("light".into(), on_off(state.light).into());
        map
    }

    fn sample_response(&self) -> Vec<u8> {
        let mut message = SAMPLE_FRAMES[0].to_vec();
        for frame in &SAMPLE_FRAMES[1..] {
            message.extend_from_slice(&frame[1..]);
        }
        message
    }
}

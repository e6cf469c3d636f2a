/*!
 * Tion S3.
 *
 * S3 speaks fixed 20 byte packets without segmentation or headers:
 * `[0x3d, command, special, 0 x 16, 0x5a]`.
 */
use bytes::Bytes;
use uuid::Uuid;

use breezer_core::config::FramingConfig;
use breezer_core::types::ValueMap;

use super::{on_off, BreezerState, Characteristics, Field, Mode, Model, ModelCodec, Param, Request};
use crate::error::Result;
use crate::frame::Framing;

const PREFIX: u8 = 0x3d;
const SUFFIX: u8 = 0x5a;
const PACKET_LEN: usize = 20;

const CMD_REQUEST_PARAMS: u8 = 1;
const CMD_SET_PARAMS: u8 = 2;
const CMD_PAIR: u8 = 5;

/// Characteristics of the S3 UART-style service
pub const CHARACTERISTICS: Characteristics = Characteristics {
    service: Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
    write: Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e),
    notify: Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
};

const STATUS_LAYOUT: &[(Param, Field)] = &[
    (Param::FanSpeed, Field::LowNibble(2)),
    (Param::Mode, Field::HighNibble(2)),
    (Param::TargetTemp, Field::Byte(3)),
    (Param::Heater, Field::Bit(4, 0)),
    (Param::State, Field::Bit(4, 1)),
    (Param::Timer, Field::Bit(4, 2)),
    (Param::Sound, Field::Bit(4, 3)),
    (Param::OutTemp, Field::Temperature(7)),
    (Param::InTemp, Field::Temperature(8)),
    (Param::FilterRemain, Field::U16Le(9)),
    (Param::DeviceTime, Field::Clock(11)),
    (Param::ErrorCode, Field::Byte(13)),
    (Param::Productivity, Field::Byte(14)),
    (Param::FirmwareVersion, Field::Firmware(17)),
];

/// Status reply recorded from a device
pub const SAMPLE_RESPONSE: [u8; PACKET_LEN] = [
    0xb3, 0x10, 0x24, 0x14, 0x03, 0x00, 0x15, 0x14, 0x14, 0x8f, 0x00, 0x0c, 0x0a, 0x00, 0x4b, 0x0a,
    0x00, 0x33, 0x00, 0x5a,
];

fn command(cmd: u8) -> Vec<u8> {
    let mut packet = vec![0u8; PACKET_LEN];
    packet[0] = PREFIX;
    packet[1] = cmd;
    packet[2] = u8::from(cmd == CMD_PAIR);
    packet[PACKET_LEN - 1] = SUFFIX;
    packet
}

/// Codec for the S3
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Codec;

impl ModelCodec for S3Codec {
    fn model(&self) -> Model {
        Model::S3
    }

    fn characteristics(&self) -> Characteristics {
        CHARACTERISTICS
    }

    fn framing(&self, _config: &FramingConfig) -> Framing {
        Framing::Raw
    }

    fn status_layout(&self) -> &'static [(Param, Field)] {
        STATUS_LAYOUT
    }

    fn status_request(&self) -> Request {
        Request::raw(command(CMD_REQUEST_PARAMS))
    }

    fn set_request(&self, state: &BreezerState) -> Request {
        let mut packet = command(CMD_SET_PARAMS);
        packet[2] = state.fan_speed;
        packet[3] = state.target_temp;
        packet[4] = Mode::encode(self.modes(), state.mode);
        packet[5] = u8::from(state.heater) | u8::from(state.state) << 1 | u8::from(state.sound) << 3;
        Request::raw(packet)
    }

    fn pair_request(&self) -> Option<Request> {
        Some(Request::raw(command(CMD_PAIR)))
    }

    fn status_body(&self, reply: &Bytes) -> Result<Bytes> {
        Ok(reply.clone())
    }

    fn extras(&self, state: &BreezerState) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("code".into(), 200.into());
        map.insert("timer".into(), on_off(state.timer).into());
        if let Some(time) = &state.device_time {
            map.insert("time".into(), time.clone().into());
        }
        map.insert("productivity".into(), state.productivity.into());
        map.insert(
            "fw_version".into(),
            state.fw_version.clone().unwrap_or_else(|| "unknown".into()).into(),
        );
        map
    }

    fn sample_response(&self) -> Vec<u8> {
        SAMPLE_RESPONSE.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use breezer_core::types::Value;

    #[test]
    fn test_status_request_bytes() {
        let request = S3Codec.status_request();
        let mut expected = vec![0u8; 20];
        expected[0] = 0x3d;
        expected[1] = 0x01;
        expected[19] = 0x5a;
        assert_eq!(request.message, expected);
        assert_eq!(request.request_id, None);
    }

    #[test]
    fn test_pair_request_sets_special_byte() {
        let request = S3Codec.pair_request().unwrap();
        assert_eq!(&request.message[..3], &[0x3d, 0x05, 0x01]);
        assert_eq!(request.message[19], 0x5a);
    }

    #[test]
    fn test_decode_sample() {
        let mut state = BreezerState::default();
        S3Codec
            .decode(&Bytes::from_static(&SAMPLE_RESPONSE), &mut state)
            .unwrap();

        assert!(state.state);
        assert!(state.heater);
        assert!(!state.sound);
        assert!(!state.timer);
        assert_eq!(state.mode, Mode::Outside);
        assert_eq!(state.in_temp, 20);
        assert_eq!(state.out_temp, 20);
        assert_eq!(state.target_temp, 20);
        assert_eq!(state.fan_speed, 4);
        assert_eq!(state.filter_remain, 143.0);
        assert_eq!(state.error_code, 0);
        assert_eq!(state.productivity, 0x4b);
        assert_eq!(state.device_time.as_deref(), Some("12:10"));
        assert_eq!(state.fw_version.as_deref(), Some("0033"));
    }

    #[test]
    fn test_status_map_of_sample() {
        let mut state = BreezerState::default();
        S3Codec
            .decode(&Bytes::from_static(&SAMPLE_RESPONSE), &mut state)
            .unwrap();
        let map = S3Codec.status_map(&state);

        assert_eq!(map["model"], Value::from("S3"));
        assert_eq!(map["state"], Value::from("on"));
        assert_eq!(map["heating"], Value::from("off"));
        assert_eq!(map["filter_remain"].as_integer(), Some(143));
        assert_eq!(map["time"], Value::from("12:10"));
        assert_eq!(map["code"], Value::Integer(200));
        assert_eq!(map["fw_version"], Value::from("0033"));
    }

    #[test]
    fn test_short_reply_is_a_decode_error() {
        let mut state = BreezerState::default();
        let err = S3Codec
            .decode(&Bytes::copy_from_slice(&SAMPLE_RESPONSE[..10]), &mut state)
            .unwrap_err();
        assert!(matches!(err, DeviceError::Decode { index: 10, .. }));
    }

    #[test]
    fn test_set_request_layout() {
        let state = BreezerState {
            state: true,
            heater: false,
            sound: true,
            mode: Mode::Mixed,
            target_temp: 22,
            fan_speed: 3,
            ..Default::default()
        };
        let packet = S3Codec.set_request(&state).message;

        assert_eq!(&packet[..6], &[0x3d, 0x02, 3, 22, 1, 0b1010]);
        assert_eq!(packet[19], 0x5a);
        assert_eq!(packet.len(), 20);
    }
}

/*!
 * Decoded breezer state and partial settings.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use breezer_core::types::{Value, ValueMap};

use crate::error::{DeviceError, Result};

/// Air intake mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Indoor air only
    Recirculation,
    /// Indoor and outdoor air
    Mixed,
    /// Outdoor air only
    #[default]
    Outside,
}

/// Mode table shared by S3 and Lite; codes past the end mean outside
pub const DEFAULT_MODES: &[Mode] = &[Mode::Recirculation, Mode::Mixed];

/// Code written for a mode missing from a model's table
const FALLBACK_MODE_CODE: u8 = 2;

impl Mode {
    /// Name used in status mappings
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Recirculation => "recirculation",
            Mode::Mixed => "mixed",
            Mode::Outside => "outside",
        }
    }

    /// Parse a mode name; anything unknown is outside
    pub fn from_name(name: &str) -> Self {
        match name {
            "recirculation" => Mode::Recirculation,
            "mixed" => Mode::Mixed,
            "outside" => Mode::Outside,
            other => {
                debug!("Unknown mode '{}', using outside", other);
                Mode::Outside
            }
        }
    }

    /// Decode a raw mode code against a model table
    pub fn decode(table: &[Mode], code: u8) -> Self {
        table.get(usize::from(code)).copied().unwrap_or(Mode::Outside)
    }

    /// Encode a mode against a model table
    pub fn encode(table: &[Mode], mode: Mode) -> u8 {
        table
            .iter()
            .position(|m| *m == mode)
            .and_then(|i| u8::try_from(i).ok())
            .unwrap_or(FALLBACK_MODE_CODE)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a flag the way the device vocabulary does
pub fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Last known state of a breezer
///
/// Only decoding and applied [`Settings`] mutate it. Fields a model does not
/// report keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BreezerState {
    /// Power
    pub state: bool,
    /// Heater enabled
    pub heater: bool,
    /// Sound enabled
    pub sound: bool,
    /// Light enabled
    pub light: bool,
    /// Timer enabled
    pub timer: bool,
    /// Filter needs replacement
    pub filter_change_required: bool,
    /// CO2 automatic control enabled
    pub co2_auto_control: bool,
    /// Device has a heater
    pub have_heater: bool,
    /// Air intake mode
    pub mode: Mode,
    /// Target temperature
    pub target_temp: u8,
    /// Fan speed, 0..=6
    pub fan_speed: u8,
    /// Incoming air temperature
    pub in_temp: i16,
    /// Outgoing air temperature
    pub out_temp: i16,
    /// Temperature of the electronics
    pub electronic_temp: u8,
    /// Electronics run time in days
    pub electronic_work_time: f64,
    /// Remaining filter life in days
    pub filter_remain: f64,
    /// Device run time in days
    pub device_work_time: f64,
    /// Last error code reported by the device
    pub error_code: u8,
    /// Productivity
    pub productivity: u8,
    /// Device clock
    pub device_time: Option<String>,
    /// Firmware version
    pub fw_version: Option<String>,
}

impl BreezerState {
    /// Minimum target/in temperature gap for the heater to count as working
    pub const HEATING_MARGIN: i16 = 3;

    /// Highest valid fan speed
    pub const MAX_FAN_SPEED: i64 = 6;

    /// Whether the heater is probably working right now
    ///
    /// The device does not report this; it is inferred from temperatures.
    pub fn heating(&self) -> bool {
        self.heater
            && i16::from(self.target_temp) - self.in_temp > Self::HEATING_MARGIN
            && self.out_temp > self.in_temp
    }

    /// Store a fan speed, falling back to 1 when out of range
    pub fn set_fan_speed(&mut self, speed: i64) {
        if (0..=Self::MAX_FAN_SPEED).contains(&speed) {
            self.fan_speed = speed as u8;
        } else {
            warn!("Incorrect new fan speed {}. Will use 1 instead", speed);
            self.fan_speed = 1;
        }
    }

    /// Merge partial settings over this state
    pub fn apply(&mut self, settings: &Settings) {
        if let Some(state) = settings.state {
            self.state = state;
        }
        if let Some(heater) = settings.heater {
            self.heater = heater;
        }
        if let Some(sound) = settings.sound {
            self.sound = sound;
        }
        if let Some(light) = settings.light {
            self.light = light;
        }
        if let Some(mode) = settings.mode {
            self.mode = mode;
        }
        if let Some(target_temp) = settings.target_temp {
            self.target_temp = target_temp;
        }
        if let Some(fan_speed) = settings.fan_speed {
            self.set_fan_speed(fan_speed);
        }
    }

    /// Keys every model reports
    pub fn common_map(&self, model: &str) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("state".into(), on_off(self.state).into());
        map.insert("heater".into(), on_off(self.heater).into());
        map.insert("heating".into(), on_off(self.heating()).into());
        map.insert("sound".into(), on_off(self.sound).into());
        map.insert("mode".into(), self.mode.name().into());
        map.insert("out_temp".into(), self.out_temp.into());
        map.insert("in_temp".into(), self.in_temp.into());
        map.insert("heater_temp".into(), self.target_temp.into());
        map.insert("target_temp".into(), self.target_temp.into());
        map.insert("fan_speed".into(), self.fan_speed.into());
        map.insert("filter_remain".into(), self.filter_remain.into());
        map.insert(
            "time".into(),
            chrono::Local::now().format("%H:%M").to_string().into(),
        );
        map.insert("request_error_code".into(), self.error_code.into());
        map.insert("model".into(), model.into());
        map
    }
}

/// A partial update; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Power
    pub state: Option<bool>,
    /// Heater
    pub heater: Option<bool>,
    /// Sound
    pub sound: Option<bool>,
    /// Light
    pub light: Option<bool>,
    /// Air intake mode
    pub mode: Option<Mode>,
    /// Target temperature
    pub target_temp: Option<u8>,
    /// Fan speed; 0 means power off, out of range values fall back to 1
    pub fan_speed: Option<i64>,
}

impl Settings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set power
    pub fn state(mut self, on: bool) -> Self {
        self.state = Some(on);
        self
    }

    /// Set heater
    pub fn heater(mut self, on: bool) -> Self {
        self.heater = Some(on);
        self
    }

    /// Set sound
    pub fn sound(mut self, on: bool) -> Self {
        self.sound = Some(on);
        self
    }

    /// Set light
    pub fn light(mut self, on: bool) -> Self {
        self.light = Some(on);
        self
    }

    /// Set mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set target temperature
    pub fn target_temp(mut self, temp: u8) -> Self {
        self.target_temp = Some(temp);
        self
    }

    /// Set fan speed
    pub fn fan_speed(mut self, speed: i64) -> Self {
        self.fan_speed = Some(speed);
        self
    }

    /// Whether nothing would change
    pub fn is_empty(&self) -> bool {
        *self == Settings::default()
    }

    /// Fan speed 0 is a request to power off with the speed unchanged
    pub fn normalized(mut self) -> Self {
        if self.fan_speed == Some(0) {
            debug!("Fan speed 0 requested, turning the breezer off instead");
            self.fan_speed = None;
            self.state = Some(false);
        }
        self
    }

    /// Parse a normalized mapping
    ///
    /// Keys the mapping shares with a status report but that cannot be set
    /// (temperatures, counters, ...) are ignored, so a status mapping can be
    /// edited and sent back.
    pub fn from_map(map: &ValueMap) -> Result<Self> {
        let mut settings = Settings::default();

        for (key, value) in map {
            match key.as_str() {
                "state" => settings.state = Some(flag(key, value)?),
                "heater" => settings.heater = Some(flag(key, value)?),
                "sound" => settings.sound = Some(flag(key, value)?),
                "light" => settings.light = Some(flag(key, value)?),
                "mode" => {
                    let name = value.as_str().ok_or_else(|| invalid(key, value))?;
                    settings.mode = Some(Mode::from_name(name));
                }
                "target_temp" | "heater_temp" => {
                    let temp = value
                        .as_integer()
                        .and_then(|t| u8::try_from(t).ok())
                        .ok_or_else(|| invalid(key, value))?;
                    settings.target_temp = Some(temp);
                }
                "fan_speed" => {
                    settings.fan_speed = Some(value.as_integer().ok_or_else(|| invalid(key, value))?);
                }
                other => debug!("Ignoring read-only or unknown parameter '{}'", other),
            }
        }

        Ok(settings)
    }
}

fn flag(key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| invalid(key, value))
}

fn invalid(key: &str, value: &Value) -> DeviceError {
    DeviceError::InvalidValue(key.to_string(), value.to_string())
}

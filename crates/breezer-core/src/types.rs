/*!
 * Core data types for Breezer.
 *
 * Device parameters cross the public API as a flat mapping of named values
 * (`state`, `fan_speed`, `in_temp`, ...). This module defines that value type.
 */
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is numeric (integer or float)
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Try to get a boolean value
    ///
    /// The device vocabulary `"on"`/`"off"` is accepted as well.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "on" => Some(true),
                "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get a float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u8> for Value {
    fn from(i: u8) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i8> for Value {
    fn from(i: i8) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A normalized parameter mapping, ordered by key
pub type ValueMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let v: Value = true.into();
        assert_eq!(v.as_bool(), Some(true));

        let v: Value = 42i32.into();
        assert_eq!(v.as_integer(), Some(42));

        let v: Value = 0xffu8.into();
        assert_eq!(v.as_integer(), Some(255));

        let v: Value = (-1i8).into();
        assert_eq!(v.as_integer(), Some(-1));

        let v: Value = 3.5f64.into();
        assert_eq!(v.as_float(), Some(3.5));

        let v: Value = "outside".into();
        assert_eq!(v.as_str(), Some("outside"));

        let v: Value = None::<i64>.into();
        assert!(v.is_null());
    }

    #[test]
    fn test_value_as_methods() {
        let v = Value::Integer(42);
        assert_eq!(v.as_float(), Some(42.0));
        assert!(v.is_numeric());

        let v = Value::Float(3.0);
        assert_eq!(v.as_integer(), Some(3));

        let v = Value::Float(3.14);
        assert_eq!(v.as_integer(), None);

        let v = Value::String("on".to_string());
        assert_eq!(v.as_bool(), Some(true));

        let v = Value::String("off".to_string());
        assert_eq!(v.as_bool(), Some(false));

        let v = Value::String("maybe".to_string());
        assert_eq!(v.as_bool(), None);
        assert!(!v.is_numeric());
    }

    #[test]
    fn test_value_serializes_untagged() {
        let mut map = ValueMap::new();
        map.insert("state".to_string(), "on".into());
        map.insert("fan_speed".to_string(), 4.into());
        map.insert("filter_remain".to_string(), 1.5.into());

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"fan_speed":4,"filter_remain":1.5,"state":"on"}"#);

        let back: ValueMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}

//! Flexible JSON decoding for fields the control plane serializes
//! inconsistently: counters that arrive as `3` or `"3"`, ids that arrive as
//! `"abc"` or `3694`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An integer that tolerates JSON strings containing an integer literal.
/// The empty string decodes to 0; any other non-numeric string is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FlexInt(pub i64);

impl FlexInt {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for FlexInt {
    fn from(v: i64) -> Self {
        FlexInt(v)
    }
}

impl fmt::Display for FlexInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for FlexInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for FlexInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FlexIntVisitor;

        impl<'de> Visitor<'de> for FlexIntVisitor {
            type Value = FlexInt;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer or a string containing an integer")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FlexInt, E> {
                Ok(FlexInt(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FlexInt, E> {
                i64::try_from(v)
                    .map(FlexInt)
                    .map_err(|_| E::custom(format!("integer out of range: {}", v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<FlexInt, E> {
                if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                    Ok(FlexInt(v as i64))
                } else {
                    Err(E::custom(format!("not an integer: {}", v)))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FlexInt, E> {
                if v.is_empty() {
                    return Ok(FlexInt(0));
                }
                v.parse::<i64>()
                    .map(FlexInt)
                    .map_err(|_| E::custom(format!("not an integer literal: {:?}", v)))
            }
        }

        deserializer.deserialize_any(FlexIntVisitor)
    }
}

/// A string that tolerates JSON integers and floats (formatted decimal,
/// never exponent notation).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlexString(pub String);

impl FlexString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for FlexString {
    fn from(v: &str) -> Self {
        FlexString(v.to_string())
    }
}

impl From<String> for FlexString {
    fn from(v: String) -> Self {
        FlexString(v)
    }
}

impl fmt::Display for FlexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for FlexString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FlexString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FlexStringVisitor;

        impl<'de> Visitor<'de> for FlexStringVisitor {
            type Value = FlexString;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FlexString, E> {
                Ok(FlexString(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FlexString, E> {
                Ok(FlexString(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FlexString, E> {
                Ok(FlexString(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<FlexString, E> {
                // Rust's Display for f64 never emits exponent notation.
                Ok(FlexString(format!("{}", v)))
            }
        }

        deserializer.deserialize_any(FlexStringVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Ids {
        owner_id: FlexString,
        user_id: FlexInt,
    }

    #[test]
    fn test_mixed_id_decoding() {
        let ids: Ids = serde_json::from_str(r#"{"owner_id": 3694, "user_id": "42"}"#).unwrap();
        assert_eq!(ids.owner_id.as_str(), "3694");
        assert_eq!(ids.user_id.value(), 42);
    }

    #[test]
    fn test_flex_int_accepts_number_and_string() {
        let a: FlexInt = serde_json::from_str("7").unwrap();
        let b: FlexInt = serde_json::from_str(r#""7""#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flex_int_empty_string_is_zero() {
        let v: FlexInt = serde_json::from_str(r#""""#).unwrap();
        assert_eq!(v.value(), 0);
    }

    #[test]
    fn test_flex_int_rejects_non_numeric_string() {
        assert!(serde_json::from_str::<FlexInt>(r#""three""#).is_err());
    }

    #[test]
    fn test_flex_string_from_float() {
        let v: FlexString = serde_json::from_str("12.5").unwrap();
        assert_eq!(v.as_str(), "12.5");
        let v: FlexString = serde_json::from_str("3694.0").unwrap();
        assert_eq!(v.as_str(), "3694");
    }

    #[test]
    fn test_round_trip_is_stable() {
        let v: FlexInt = serde_json::from_str(r#""19""#).unwrap();
        let encoded = serde_json::to_string(&v).unwrap();
        assert_eq!(encoded, "19");
        let again: FlexInt = serde_json::from_str(&encoded).unwrap();
        assert_eq!(again, v);

        let s: FlexString = serde_json::from_str("42").unwrap();
        let encoded = serde_json::to_string(&s).unwrap();
        let again: FlexString = serde_json::from_str(&encoded).unwrap();
        assert_eq!(again, s);
    }
}

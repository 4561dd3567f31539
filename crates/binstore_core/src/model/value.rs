//! Wire values and the type-coercion codec.
//!
//! # Responsibility
//! - Define the only value vocabulary the store understands.
//! - Convert domain types to and from that vocabulary deterministically.
//!
//! # Invariants
//! - Booleans are encoded as `"0"`/`"1"` strings so they stay indexable.
//! - 32-bit floats and decimals are encoded as plain decimal strings.
//! - 16/32-bit integers widen to `Int`; timestamps become epoch milliseconds.
//! - Decoding never guesses: a raw value of the wrong kind is a `TypeMismatch`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// One store-native value.
///
/// Serialized untagged so list/map payloads stay plain JSON; integer and
/// float numbers remain distinguishable because `serde_json` keeps the
/// fractional marker on doubles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Stable kind name used in diagnostics and persisted type tags.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Canonical textual form used for change detection.
    ///
    /// Two values with equal canonical text are treated as the same value
    /// even when their in-memory kinds differ (`Int(3)` vs `Double(3.0)`).
    pub fn canonical_text(&self) -> String {
        self.to_string()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (idx, (key, item)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}={item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Decode failure for typed accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Raw value kind does not match the decode rule.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// Raw value has the right kind but its content does not parse.
    Parse { expected: &'static str, raw: String },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            Self::Parse { expected, raw } => {
                write!(f, "cannot decode `{raw}` as {expected}")
            }
        }
    }
}

impl Error for CodecError {}

/// Encode direction: domain value -> wire value.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Decode direction: wire value -> domain value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, CodecError>;
}

fn mismatch(expected: &'static str, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

fn expect_str<'a>(expected: &'static str, value: &'a Value) -> Result<&'a str, CodecError> {
    value.as_str().ok_or_else(|| mismatch(expected, value))
}

fn expect_int(expected: &'static str, value: &Value) -> Result<i64, CodecError> {
    value.as_int().ok_or_else(|| mismatch(expected, value))
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        Ok(value.clone())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        expect_str("string", value).map(str::to_string)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Str(if self { "1" } else { "0" }.to_string())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        match expect_str("boolean", value)? {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(CodecError::TypeMismatch {
                expected: "boolean",
                found: "string",
            }),
        }
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        let raw = expect_str("float", value)?;
        raw.parse::<f32>().map_err(|_| CodecError::Parse {
            expected: "float",
            raw: raw.to_string(),
        })
    }
}

impl IntoValue for BigDecimal {
    fn into_value(self) -> Value {
        Value::Str(self.to_plain_string())
    }
}

impl IntoValue for &BigDecimal {
    fn into_value(self) -> Value {
        Value::Str(self.to_plain_string())
    }
}

impl FromValue for BigDecimal {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        let raw = expect_str("decimal", value)?;
        BigDecimal::from_str(raw).map_err(|_| CodecError::Parse {
            expected: "decimal",
            raw: raw.to_string(),
        })
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        expect_int("long", value)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl FromValue for i32 {
    /// Narrowing truncates; callers guarantee the stored range.
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        expect_int("integer", value).map(|raw| raw as i32)
    }
}

impl IntoValue for i16 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        expect_int("short", value).map(|raw| raw as i16)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Double(self)
    }
}

impl FromValue for f64 {
    /// Accepts a legacy integer bin and reinterprets its bits, which is how
    /// doubles were stored before the store had a native double type.
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        match value {
            Value::Double(raw) => Ok(*raw),
            Value::Int(bits) => Ok(f64::from_bits(*bits as u64)),
            other => Err(mismatch("double", other)),
        }
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Int(self.timestamp_millis())
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        let millis = expect_int("timestamp", value)?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| CodecError::Parse {
                expected: "timestamp",
                raw: millis.to_string(),
            })
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            other => Err(mismatch("list", other)),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(key, item)| (key, item.into_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, CodecError> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), T::from_value(item)?)))
                .collect(),
            other => Err(mismatch("map", other)),
        }
    }
}

/// Encodes one domain value.
pub fn encode<T: IntoValue>(value: T) -> Value {
    value.into_value()
}

/// Decodes one wire value into the requested domain type.
pub fn decode<T: FromValue>(value: &Value) -> Result<T, CodecError> {
    T::from_value(value)
}

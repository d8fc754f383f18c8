//! Value model for node reads and writes.
//!
//! `Value` is the closed set of scalar kinds the gateway moves between the
//! remote endpoint and its callers. `DataType` is the declared type tag a
//! write must carry; there is no type inference on the write path.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::core::error::{GatewayError, Result};

/// A node value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    Bool(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    /// Absent value (empty variant on the wire).
    #[default]
    Null,
}

impl Value {
    /// Short name of the value kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::SByte(_) => "int8",
            Self::Byte(_) => "uint8",
            Self::Int16(_) => "int16",
            Self::UInt16(_) => "uint16",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uint32",
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Float(_) => "float32",
            Self::Double(_) => "float64",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Null => "nil",
        }
    }

    /// Check if this is an integer or floating-point kind.
    pub fn is_numeric(&self) -> bool {
        !matches!(
            self,
            Self::Bool(_) | Self::String(_) | Self::DateTime(_) | Self::Null
        )
    }

    /// Try to get the value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::SByte(v) => Some(*v as f64),
            Self::Byte(v) => Some(*v as f64),
            Self::Int16(v) => Some(*v as f64),
            Self::UInt16(v) => Some(*v as f64),
            Self::Int32(v) => Some(*v as f64),
            Self::UInt32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to get the value as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Recover a value from its JSON form on the client side.
    ///
    /// Integers prefer `Int64`, then `UInt64`; other numbers become `Double`.
    /// Strings stay strings (timestamps are recognised later by the encoder).
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt64(u)
                } else {
                    Self::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::SByte(v) => serializer.serialize_i8(*v),
            Self::Byte(v) => serializer.serialize_u8(*v),
            Self::Int16(v) => serializer.serialize_i16(*v),
            Self::UInt16(v) => serializer.serialize_u16(*v),
            Self::Int32(v) => serializer.serialize_i32(*v),
            Self::UInt32(v) => serializer.serialize_u32(*v),
            Self::Int64(v) => serializer.serialize_i64(*v),
            Self::UInt64(v) => serializer.serialize_u64(*v),
            Self::Float(v) => serializer.serialize_f32(*v),
            Self::Double(v) => serializer.serialize_f64(*v),
            Self::String(s) => serializer.serialize_str(s),
            Self::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            Self::Null => serializer.serialize_unit(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::SByte(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Self::Null => write!(f, "<nil>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// Declared type tag for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl DataType {
    /// All supported tags, in documentation order.
    pub const ALL: [DataType; 12] = [
        Self::Boolean,
        Self::SByte,
        Self::Byte,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float,
        Self::Double,
        Self::String,
    ];

    /// Lowercase tag name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::SByte => "sbyte",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
        }
    }

    /// Parse raw text under this tag's grammar.
    pub fn parse_value(self, raw: &str) -> Result<Value> {
        let tag = self.as_str();
        let value = match self {
            Self::Boolean => Value::Bool(parse_bool(raw).ok_or_else(|| {
                GatewayError::invalid_value(tag, raw, "expected one of 1, t, true, 0, f, false")
            })?),
            Self::SByte => Value::SByte(parse_signed(tag, raw)?),
            Self::Byte => Value::Byte(parse_unsigned(tag, raw)?),
            Self::Int16 => Value::Int16(parse_signed(tag, raw)?),
            Self::UInt16 => Value::UInt16(parse_unsigned(tag, raw)?),
            Self::Int32 => Value::Int32(parse_signed(tag, raw)?),
            Self::UInt32 => Value::UInt32(parse_unsigned(tag, raw)?),
            Self::Int64 => Value::Int64(parse_signed(tag, raw)?),
            Self::UInt64 => Value::UInt64(parse_unsigned(tag, raw)?),
            Self::Float => Value::Float(parse_float(tag, raw)?),
            Self::Double => Value::Double(parse_float(tag, raw)?),
            Self::String => Value::String(raw.to_string()),
        };
        Ok(value)
    }
}

impl FromStr for DataType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let supported: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
                GatewayError::UnknownDataType(format!(
                    "{}. Use one of: {}",
                    s,
                    supported.join(", ")
                ))
            })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_signed<T>(tag: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| GatewayError::invalid_value(tag, raw, e.to_string()))
}

fn parse_unsigned<T>(tag: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    // std accepts a leading '+' for unsigned types; the write grammar does not.
    if !raw.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(GatewayError::invalid_value(tag, raw, "invalid digit found in string"));
    }
    parse_signed(tag, raw)
}

fn parse_float<T>(tag: &str, raw: &str) -> Result<T>
where
    T: FromStr + Into<f64> + Copy,
    T::Err: fmt::Display,
{
    let parsed: T = raw
        .parse()
        .map_err(|e| GatewayError::invalid_value(tag, raw, format!("{}", e)))?;
    let wide: f64 = parsed.into();
    let literal_inf = raw
        .trim_start_matches(['+', '-'])
        .to_ascii_lowercase()
        .starts_with("inf");
    if wide.is_infinite() && !literal_inf {
        return Err(GatewayError::invalid_value(tag, raw, "value out of range"));
    }
    Ok(parsed)
}

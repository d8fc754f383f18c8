//! Telemetry line records.
//!
//! Renders node values as `<measurement>,<tags> <fields> <timestamp>` lines.
//! Every record carries at least one numeric field so that numeric-only
//! time-series backends ingest every observation.
//!
//! Numeric policy for the `value` field:
//!
//! | Value kind | Fields |
//! |------------|--------|
//! | bool | `value=1` / `value=0` |
//! | integer / float | `value=<n>` |
//! | timestamp string or datetime | `value=<epoch nanos>` |
//! | other string, null | `value=1,string_value="<text>"` |

use std::fmt;

use chrono::{NaiveDateTime, Utc};

use crate::core::address::NodeAddress;
use crate::core::data::Value;

/// Timestamp layouts recognised in string values, with and without fraction.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ"];

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Str(_))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(s) => write!(f, "\"{}\"", escape_field_string(s)),
        }
    }
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp_nanos: i64,
}

impl TelemetryRecord {
    pub fn new(measurement: impl Into<String>, timestamp_nanos: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_nanos,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Value of a tag, unescaped.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a field.
    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn has_numeric_field(&self) -> bool {
        self.fields.iter().any(|(_, v)| v.is_numeric())
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&escape_measurement(&self.measurement))?;
        for (key, value) in &self.tags {
            write!(f, ",{}={}", escape_tag(key), escape_tag(value))?;
        }
        for (i, (key, value)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            write!(f, "{}{}={}", sep, escape_tag(key), value)?;
        }
        write!(f, " {}", self.timestamp_nanos)
    }
}

/// Escape a tag key or value: comma, equals, space and double quote.
pub fn escape_tag(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_field_string(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Current time as epoch nanoseconds.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Parse one of the recognised absolute timestamp layouts.
pub fn parse_timestamp_nanos(s: &str) -> Option<i64> {
    TIMESTAMP_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
    })
}

/// Fields for a scalar value under the numeric-first policy.
pub fn value_fields(value: &Value) -> Vec<(String, FieldValue)> {
    let numeric = |v: FieldValue| vec![("value".to_string(), v)];
    match value {
        Value::Bool(b) => numeric(FieldValue::Integer(i64::from(*b))),
        Value::SByte(v) => numeric(FieldValue::Integer(i64::from(*v))),
        Value::Byte(v) => numeric(FieldValue::Integer(i64::from(*v))),
        Value::Int16(v) => numeric(FieldValue::Integer(i64::from(*v))),
        Value::UInt16(v) => numeric(FieldValue::Integer(i64::from(*v))),
        Value::Int32(v) => numeric(FieldValue::Integer(i64::from(*v))),
        Value::UInt32(v) => numeric(FieldValue::Integer(i64::from(*v))),
        Value::Int64(v) => numeric(FieldValue::Integer(*v)),
        Value::UInt64(v) => numeric(FieldValue::Unsigned(*v)),
        // Line protocol has no NaN or infinity literal.
        Value::Float(v) if !v.is_finite() => constant_with_text(&value.to_string()),
        Value::Double(v) if !v.is_finite() => constant_with_text(&value.to_string()),
        // Shortest f32 text widened, so 0.1f32 renders as 0.1.
        Value::Float(v) => numeric(FieldValue::Float(
            v.to_string().parse().unwrap_or(f64::from(*v)),
        )),
        Value::Double(v) => numeric(FieldValue::Float(*v)),
        Value::DateTime(dt) => match dt.timestamp_nanos_opt() {
            Some(n) => numeric(FieldValue::Integer(n)),
            None => constant_with_text(&value.to_string()),
        },
        Value::String(s) => match parse_timestamp_nanos(s) {
            Some(n) => numeric(FieldValue::Integer(n)),
            None => constant_with_text(s),
        },
        Value::Null => constant_with_text(&value.to_string()),
    }
}

fn constant_with_text(text: &str) -> Vec<(String, FieldValue)> {
    vec![
        ("value".to_string(), FieldValue::Integer(1)),
        ("string_value".to_string(), FieldValue::Str(text.to_string())),
    ]
}

/// Encode a scalar node value, stamped with the current time.
pub fn encode(
    measurement: &str,
    address: &NodeAddress,
    value: &Value,
    endpoint: &str,
) -> TelemetryRecord {
    encode_at(measurement, address, value, endpoint, now_nanos())
}

/// Encode a scalar node value with an explicit timestamp.
pub fn encode_at(
    measurement: &str,
    address: &NodeAddress,
    value: &Value,
    endpoint: &str,
    timestamp_nanos: i64,
) -> TelemetryRecord {
    let mut record = TelemetryRecord::new(measurement, timestamp_nanos)
        .tag("node_id", address.to_string())
        .tag("endpoint", endpoint);
    record.fields = value_fields(value);
    record
}

/// Browse result view encoded by `encode_node_summary`.
#[derive(Debug, Clone, Copy)]
pub struct NodeSummaryView<'a> {
    pub node_id: &'a str,
    pub path: &'a str,
    pub data_type: &'a str,
    pub writable: bool,
    pub description: &'a str,
}

/// Encode one browse result.
pub fn encode_node_summary(
    measurement: &str,
    node: NodeSummaryView<'_>,
    endpoint: &str,
    timestamp_nanos: i64,
) -> TelemetryRecord {
    let data_type = if node.data_type.is_empty() {
        "unknown"
    } else {
        node.data_type
    };
    TelemetryRecord::new(measurement, timestamp_nanos)
        .tag("node_id", node.node_id)
        .tag("path", node.path)
        .tag("data_type", data_type)
        .tag("endpoint", endpoint)
        .field("writable", FieldValue::Integer(i64::from(node.writable)))
        .field("description", FieldValue::Str(node.description.to_string()))
}

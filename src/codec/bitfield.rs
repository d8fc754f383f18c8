//! 32-bit bitmask expansion.
//!
//! Decomposes one alarm/status word into 32 named observations, bit 0 being
//! the least-significant bit. Bit names are validated before anything is
//! produced, independent of the value.

use crate::codec::line_protocol::{now_nanos, FieldValue, TelemetryRecord};
use crate::core::address::NodeAddress;
use crate::core::data::Value;
use crate::core::error::{GatewayError, Result};

/// Number of bits in an expanded word.
pub const BIT_COUNT: usize = 32;

/// One bit of an expanded word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitRecord {
    pub index: u8,
    pub value: u8,
    pub name: String,
}

/// Bit names must be absent, empty, or exactly 32 long.
pub fn validate_bit_names(names: Option<&[String]>) -> Result<()> {
    match names {
        Some(names) if !names.is_empty() && names.len() != BIT_COUNT => {
            Err(GatewayError::BitNameCountMismatch(names.len()))
        }
        _ => Ok(()),
    }
}

/// Split a comma-separated bit-name list, trimming whitespace, and validate it.
///
/// An empty or blank string means "use default names".
pub fn parse_bit_names(csv: &str) -> Result<Option<Vec<String>>> {
    if csv.trim().is_empty() {
        return Ok(None);
    }
    let names: Vec<String> = csv.split(',').map(|n| n.trim().to_string()).collect();
    validate_bit_names(Some(&names))?;
    Ok(Some(names))
}

/// Convert a node value to the 32-bit word, truncating wider numerics.
pub fn to_u32(value: &Value) -> Result<u32> {
    let word = match value {
        Value::SByte(v) => *v as u32,
        Value::Byte(v) => u32::from(*v),
        Value::Int16(v) => *v as u32,
        Value::UInt16(v) => u32::from(*v),
        Value::Int32(v) => *v as u32,
        Value::UInt32(v) => *v,
        Value::Int64(v) => *v as u32,
        Value::UInt64(v) => *v as u32,
        Value::Float(v) => *v as u32,
        Value::Double(v) => *v as u32,
        other => return Err(GatewayError::UnsupportedType(other.kind_name().to_string())),
    };
    Ok(word)
}

/// Extract all 32 bits of `word`.
pub fn extract_bits(word: u32, names: Option<&[String]>) -> Result<Vec<BitRecord>> {
    validate_bit_names(names)?;
    let names = names.filter(|n| n.len() == BIT_COUNT);

    Ok((0..BIT_COUNT)
        .map(|i| BitRecord {
            index: i as u8,
            value: ((word >> i) & 1) as u8,
            name: names
                .map(|n| n[i].clone())
                .unwrap_or_else(|| format!("bit_{}", i)),
        })
        .collect())
}

/// Expand a node value into 32 records stamped with the current time.
pub fn encode_bits(
    measurement: &str,
    address: &NodeAddress,
    value: &Value,
    endpoint: &str,
    names: Option<&[String]>,
) -> Result<Vec<TelemetryRecord>> {
    encode_bits_at(measurement, address, value, endpoint, names, now_nanos())
}

/// Expand a node value into 32 records with an explicit timestamp.
pub fn encode_bits_at(
    measurement: &str,
    address: &NodeAddress,
    value: &Value,
    endpoint: &str,
    names: Option<&[String]>,
    timestamp_nanos: i64,
) -> Result<Vec<TelemetryRecord>> {
    validate_bit_names(names)?;
    let word = to_u32(value)?;
    let node_id = address.to_string();

    Ok(extract_bits(word, names)?
        .into_iter()
        .map(|bit| {
            TelemetryRecord::new(measurement, timestamp_nanos)
                .tag("node_id", node_id.as_str())
                .tag("endpoint", endpoint)
                .tag("bit", bit.index.to_string())
                .tag("bit_name", bit.name)
                .field("value", FieldValue::Integer(i64::from(bit.value)))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "opc.tcp://172.18.11.10:4840";
    const PRODUCTION_VALUE: u32 = 134_217_856;

    fn rack() -> NodeAddress {
        NodeAddress::parse(r#"ns=5;s="Root"."Objects"."event_rack""#).unwrap()
    }

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}_{}", prefix, i)).collect()
    }

    #[test]
    fn test_production_value() {
        let bits = extract_bits(PRODUCTION_VALUE, None).unwrap();
        assert_eq!(bits.len(), 32);
        for bit in &bits {
            let expected = u8::from(bit.index == 7 || bit.index == 27);
            assert_eq!(bit.value, expected, "bit {}", bit.index);
            assert_eq!(bit.name, format!("bit_{}", bit.index));
        }
    }

    #[test]
    fn test_lsb_first() {
        let bits = extract_bits(1, None).unwrap();
        assert_eq!(bits[0].value, 1);
        assert!(bits[1..].iter().all(|b| b.value == 0));
        let bits = extract_bits(0x8000_0000, None).unwrap();
        assert_eq!(bits[31].value, 1);
    }

    #[test]
    fn test_encode_production_lines() {
        let lines: Vec<String> = encode_bits_at(
            "event_rack",
            &rack(),
            &Value::Double(f64::from(PRODUCTION_VALUE)),
            ENDPOINT,
            None,
            1,
        )
        .unwrap()
        .iter()
        .map(|r| r.to_string())
        .collect();

        assert_eq!(lines.len(), 32);
        assert!(lines[7].starts_with("event_rack,"));
        assert!(lines[7].contains("bit=7,"));
        assert!(lines[7].contains("bit_name=bit_7"));
        assert!(lines[7].contains(" value=1 "));
        assert!(lines[7].contains(r#"node_id=ns\=5;s\=\"Root\".\"Objects\".\"event_rack\""#));
        assert!(lines[27].contains(" value=1 "));
        assert!(lines[0].contains(" value=0 "));
        assert!(lines[31].contains(" value=0 "));
        assert!(lines
            .iter()
            .all(|l| l.contains("endpoint=opc.tcp://172.18.11.10:4840")));
    }

    #[test]
    fn test_custom_names() {
        let mut custom = names("reserved", 32);
        custom[0] = "motor_fault".into();
        custom[7] = "drive_fault".into();
        let records = encode_bits_at(
            "alarms",
            &rack(),
            &Value::UInt32(PRODUCTION_VALUE),
            ENDPOINT,
            Some(&custom),
            1,
        )
        .unwrap();
        assert_eq!(records[0].tag_value("bit_name"), Some("motor_fault"));
        assert_eq!(records[7].tag_value("bit_name"), Some("drive_fault"));
        assert_eq!(records[31].tag_value("bit_name"), Some("reserved_31"));
    }

    #[test]
    fn test_name_escaping() {
        let mut custom = names("n", 32);
        custom[0] = "motor,fault".into();
        custom[1] = "temp=high".into();
        custom[2] = "status ok".into();
        custom[3] = r#"name"quoted""#.into();
        custom[4] = "normal".into();
        let lines: Vec<String> =
            encode_bits_at("m", &rack(), &Value::UInt32(0), ENDPOINT, Some(&custom), 1)
                .unwrap()
                .iter()
                .map(|r| r.to_string())
                .collect();
        assert!(lines[0].contains(r"bit_name=motor\,fault"));
        assert!(lines[1].contains(r"bit_name=temp\=high"));
        assert!(lines[2].contains(r"bit_name=status\ ok"));
        assert!(lines[3].contains(r#"bit_name=name\"quoted\""#));
        assert!(lines[4].contains("bit_name=normal "));
    }

    #[test]
    fn test_name_count_mismatch_even_for_zero() {
        for n in [1, 16, 31, 33] {
            let custom = names("x", n);
            let err = encode_bits_at("m", &rack(), &Value::UInt32(0), ENDPOINT, Some(&custom), 1)
                .unwrap_err();
            assert!(err.to_string().contains("must be exactly 32"));
        }
    }

    #[test]
    fn test_empty_names_use_defaults() {
        let empty: Vec<String> = Vec::new();
        let records =
            encode_bits_at("m", &rack(), &Value::UInt32(3), ENDPOINT, Some(&empty), 1).unwrap();
        assert_eq!(records[1].tag_value("bit_name"), Some("bit_1"));
        assert_eq!(records[1].field_value("value"), Some(&FieldValue::Integer(1)));
        assert_eq!(records[2].field_value("value"), Some(&FieldValue::Integer(0)));
    }

    #[test]
    fn test_non_numeric_rejected() {
        for value in [Value::from("134217856"), Value::Bool(true), Value::Null] {
            let err = encode_bits_at("m", &rack(), &value, ENDPOINT, None, 1).unwrap_err();
            assert!(matches!(err, GatewayError::UnsupportedType(_)));
            assert!(err.to_string().contains("cannot be converted to uint32"));
        }
    }

    #[test]
    fn test_truncating_conversion() {
        assert_eq!(to_u32(&Value::Double(3.9)).unwrap(), 3);
        assert_eq!(to_u32(&Value::Int64(0x1_0000_0005)).unwrap(), 5);
        assert_eq!(to_u32(&Value::Int32(-1)).unwrap(), u32::MAX);
        assert_eq!(to_u32(&Value::UInt16(7)).unwrap(), 7);
    }

    #[test]
    fn test_parse_bit_names() {
        assert_eq!(parse_bit_names("").unwrap(), None);
        assert_eq!(parse_bit_names("  ").unwrap(), None);
        let csv = names("b", 32).join(" , ");
        let parsed = parse_bit_names(&csv).unwrap().unwrap();
        assert_eq!(parsed.len(), 32);
        assert_eq!(parsed[3], "b_3");
        assert!(matches!(
            parse_bit_names("a,b,c"),
            Err(GatewayError::BitNameCountMismatch(3))
        ));
    }
}

//! Output codecs.
//!
//! Line-record encoding of node values and 32-bit bitmask expansion.

pub mod bitfield;
pub mod line_protocol;

pub use bitfield::{encode_bits, extract_bits, parse_bit_names, validate_bit_names, BitRecord};
pub use line_protocol::{encode, escape_tag, FieldValue, TelemetryRecord};

//! Node address parsing.
//!
//! Converts `ns=<ns>;<kind>=<id>` (or the comma form `ns=<ns>,<kind>=<id>`)
//! into a structured `NodeAddress`.
//!
//! # Address Formats
//!
//! - `"ns=0;i=2258"` → namespace=0, numeric identifier 2258
//! - `"ns=3,s=Temperature"` → namespace=3, string identifier "Temperature"
//! - `ns=5;s="Root"."Objects"."Temperature"` → path-style string identifier
//!
//! The identifier is taken verbatim to the end of the string. It may contain
//! `.`, quotes or `=`, but not the delimiter used for the outer split; use
//! the other delimiter when the identifier needs one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, Result};

const FORMAT_HINT: &str = "expected format: ns=X;Y=Z or ns=X,Y=Z where Y is 'i' or 's'";

/// Identifier kind of a node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    /// `i=` numeric identifier.
    #[serde(rename = "i")]
    Numeric,
    /// `s=` string identifier.
    #[serde(rename = "s")]
    String,
}

impl IdKind {
    /// Single-letter clause prefix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "i",
            Self::String => "s",
        }
    }
}

impl FromStr for IdKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "i" => Ok(Self::Numeric),
            "s" => Ok(Self::String),
            other => Err(GatewayError::AddressInvalid(format!(
                "unsupported identifier type '{}'. Only 'i' (numeric) and 's' (string) are supported",
                other
            ))),
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    namespace: String,
    kind: IdKind,
    identifier: String,
}

impl NodeAddress {
    /// Build an address from its three components.
    pub fn new(namespace: &str, kind: &str, identifier: &str) -> Result<Self> {
        if namespace.is_empty() || kind.is_empty() || identifier.is_empty() {
            return Err(GatewayError::AddressInvalid(format!(
                "namespace, type and identifier must be non-empty; {}",
                FORMAT_HINT
            )));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            kind: kind.parse()?,
            identifier: identifier.to_string(),
        })
    }

    /// Numeric address from wire integers.
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace: namespace.to_string(),
            kind: IdKind::Numeric,
            identifier: id.to_string(),
        }
    }

    /// String address from a wire namespace index.
    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.to_string(),
            kind: IdKind::String,
            identifier: id.into(),
        }
    }

    /// Parse `ns=<ns>;<kind>=<id>` or `ns=<ns>,<kind>=<id>`.
    ///
    /// A comma anywhere selects the comma form; otherwise a semicolon must
    /// be present. Exactly two clauses must result.
    pub fn parse(text: &str) -> Result<Self> {
        let delimiter = if text.contains(',') {
            ','
        } else if text.contains(';') {
            ';'
        } else {
            return Err(GatewayError::AddressInvalid(format!(
                "'{}': {}",
                text, FORMAT_HINT
            )));
        };

        let clauses: Vec<&str> = text.split(delimiter).collect();
        let [ns_clause, id_clause] = clauses.as_slice() else {
            return Err(GatewayError::AddressInvalid(format!(
                "'{}': expected exactly two clauses; {}",
                text, FORMAT_HINT
            )));
        };

        let namespace = match ns_clause.split_once('=') {
            Some(("ns", ns)) => ns,
            _ => "",
        };
        let (kind, identifier) = id_clause.split_once('=').unwrap_or(("", ""));

        if namespace.is_empty() || kind.is_empty() || identifier.is_empty() {
            return Err(GatewayError::AddressInvalid(format!(
                "'{}': {}",
                text, FORMAT_HINT
            )));
        }

        Self::new(namespace, kind, identifier)
    }

    /// Parse a browse root.
    ///
    /// Accepts everything `parse` accepts, plus a bare `<kind>=<id>` clause
    /// which addresses namespace 0 (the default root is `i=84`).
    pub fn parse_browse_root(text: &str) -> Result<Self> {
        if text.contains([';', ',']) {
            return Self::parse(text);
        }
        match text.split_once('=') {
            Some((kind, identifier)) => Self::new("0", kind, identifier),
            None => Err(GatewayError::AddressInvalid(format!(
                "'{}': expected i=<id>, s=<id> or {}",
                text, FORMAT_HINT
            ))),
        }
    }

    /// Check the components fit the wire representation.
    ///
    /// The namespace must be a 16-bit index and a numeric identifier must be
    /// a 32-bit value.
    pub fn validate(&self) -> Result<()> {
        self.namespace_index()?;
        if self.kind == IdKind::Numeric {
            self.numeric_id()?;
        }
        Ok(())
    }

    /// Namespace index as the wire integer.
    pub fn namespace_index(&self) -> Result<u16> {
        self.namespace.parse().map_err(|_| {
            GatewayError::AddressInvalid(format!(
                "namespace '{}' is not a valid namespace index",
                self.namespace
            ))
        })
    }

    /// Numeric identifier as the wire integer.
    pub fn numeric_id(&self) -> Result<u32> {
        self.identifier.parse().map_err(|_| {
            GatewayError::AddressInvalid(format!(
                "identifier '{}' is not a valid numeric id",
                self.identifier
            ))
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl FromStr for NodeAddress {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};{}={}", self.namespace, self.kind, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn test_parse_semicolon() {
        let addr = NodeAddress::parse("ns=0;i=2258").unwrap();
        assert_eq!(addr.namespace(), "0");
        assert_eq!(addr.kind(), IdKind::Numeric);
        assert_eq!(addr.identifier(), "2258");
    }

    #[test]
    fn test_parse_comma() {
        let addr = NodeAddress::parse("ns=3,s=Temperature").unwrap();
        assert_eq!(addr.namespace(), "3");
        assert_eq!(addr.kind(), IdKind::String);
        assert_eq!(addr.identifier(), "Temperature");
    }

    #[test]
    fn test_parse_path_identifier() {
        let addr = NodeAddress::parse(r#"ns=5;s="Root"."Objects"."Temperature""#).unwrap();
        assert_eq!(addr.identifier(), r#""Root"."Objects"."Temperature""#);
        assert_eq!(
            addr.to_string(),
            r#"ns=5;s="Root"."Objects"."Temperature""#
        );
    }

    #[test]
    fn test_identifier_with_other_delimiter() {
        let addr = NodeAddress::parse("ns=2,s=a;b").unwrap();
        assert_eq!(addr.identifier(), "a;b");
    }

    #[test_case("invalid" ; "no delimiter")]
    #[test_case("i=2258" ; "bare clause")]
    #[test_case("ns=1;i=2;x" ; "three clauses")]
    #[test_case("ns=1,s=a,b" ; "comma inside identifier")]
    #[test_case("ns=;i=1" ; "empty namespace")]
    #[test_case("ns=1;i=" ; "empty identifier")]
    #[test_case("ns=1;=5" ; "empty kind")]
    #[test_case("nx=1;i=5" ; "wrong namespace key")]
    #[test_case("ns=1;g=5" ; "guid kind")]
    #[test_case("ns=1;b=5" ; "opaque kind")]
    fn test_parse_rejects(input: &str) {
        assert!(matches!(
            NodeAddress::parse(input),
            Err(GatewayError::AddressInvalid(_))
        ));
    }

    #[test]
    fn test_unsupported_kind_message() {
        let err = NodeAddress::parse("ns=1;g=5").unwrap_err();
        assert!(err.to_string().contains("unsupported identifier type 'g'"));
    }

    #[test]
    fn test_browse_root() {
        let root = NodeAddress::parse_browse_root("i=84").unwrap();
        assert_eq!(root.to_string(), "ns=0;i=84");
        let root = NodeAddress::parse_browse_root("ns=2;s=Line1").unwrap();
        assert_eq!(root.namespace(), "2");
        assert!(NodeAddress::parse_browse_root("84").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(NodeAddress::parse("ns=1;i=42").unwrap().validate().is_ok());
        assert!(NodeAddress::parse("ns=70000;i=42").unwrap().validate().is_err());
        assert!(NodeAddress::parse("ns=x;s=a").unwrap().validate().is_err());
        assert!(NodeAddress::parse("ns=1;i=abc").unwrap().validate().is_err());
        assert!(NodeAddress::parse("ns=1;s=abc").unwrap().validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_delimiter_independence(
            ns in "[0-9]{1,5}",
            kind in prop_oneof![Just("i"), Just("s")],
            id in "[A-Za-z0-9_.\"]{1,24}",
        ) {
            let semi = NodeAddress::parse(&format!("ns={};{}={}", ns, kind, id)).unwrap();
            let comma = NodeAddress::parse(&format!("ns={},{}={}", ns, kind, id)).unwrap();
            prop_assert_eq!(semi, comma);
        }

        #[test]
        fn prop_no_delimiter_fails(text in "[^,;]*") {
            prop_assert!(NodeAddress::parse(&text).is_err());
        }
    }
}

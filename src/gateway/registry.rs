//! Connection registry: connection name → control-plane port.
//!
//! Pure functions only. Any client can recompute a gateway's port from the
//! connection name without a discovery step.

/// Reserved connection name that maps to the base port.
pub const DEFAULT_CONNECTION: &str = "default";

/// First port of the hashed range.
pub const PORT_RANGE_START: u16 = 10_000;

/// Width of the hashed range.
pub const PORT_RANGE_LEN: u32 = 55_000;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the UTF-8 bytes of `s`.
///
/// Stable across processes, platforms and releases, unlike the std hasher.
pub fn fnv1a32(s: &str) -> u32 {
    s.bytes().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Port for a connection name.
///
/// The reserved name gets `base_port`; any other name gets
/// `10000 + fnv1a32(name) % 55000`. Collisions between names are possible
/// but unlikely; this is routing, not a security boundary.
pub fn port_for(name: &str, base_port: u16) -> u16 {
    if name == DEFAULT_CONNECTION {
        return base_port;
    }
    // Always < 65000, so the cast cannot overflow.
    PORT_RANGE_START + (fnv1a32(name) % PORT_RANGE_LEN) as u16
}

/// Human-readable label for log lines and hints.
pub fn service_descriptor(name: &str) -> String {
    if name == DEFAULT_CONNECTION {
        "OPCUA service".to_string()
    } else {
        format!("OPCUA service '{}'", name)
    }
}

/// Command line that starts the gateway for `name`.
pub fn start_hint(name: &str) -> String {
    if name == DEFAULT_CONNECTION {
        "uagw service --endpoint <url>".to_string()
    } else {
        format!("uagw --connection {} service --endpoint <url>", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fnv_vectors() {
        assert_eq!(fnv1a32(""), 0x811c_9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c_292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_default_uses_base() {
        assert_eq!(port_for("default", 8765), 8765);
        assert_eq!(port_for("default", 9000), 9000);
    }

    #[test]
    fn test_distinct_names() {
        let a = port_for("plc1", 8765);
        let b = port_for("plc2", 8765);
        assert_ne!(a, b);
        assert_eq!(a, port_for("plc1", 8765));
    }

    #[test]
    fn test_base_port_only_affects_default() {
        assert_eq!(port_for("line1", 8765), port_for("line1", 1));
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(service_descriptor("default"), "OPCUA service");
        assert_eq!(service_descriptor("line1"), "OPCUA service 'line1'");
        assert!(start_hint("line1").contains("--connection line1"));
    }

    proptest! {
        #[test]
        fn prop_port_in_range(name in "[a-zA-Z0-9_-]{1,32}") {
            prop_assume!(name != DEFAULT_CONNECTION);
            let port = port_for(&name, 8765);
            prop_assert!((10_000..65_000).contains(&port));
            prop_assert_eq!(port, port_for(&name, 8765));
        }
    }
}

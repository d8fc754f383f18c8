//! Connector factory.
//!
//! Picks the collaborator for an endpoint URL by scheme.

use std::sync::Arc;

use crate::core::error::{GatewayError, Result};
use crate::core::traits::EndpointConnector;
use crate::gateway::config::GatewayConfig;
use crate::protocols::virtual_endpoint::VirtualEndpoint;

/// Scheme served by the OPC UA client.
pub const OPC_TCP_SCHEME: &str = "opc.tcp://";

/// Scheme served by the in-memory endpoint.
pub const VIRTUAL_SCHEME: &str = "virtual://";

fn has_scheme(url: &str, scheme: &str) -> bool {
    url.get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
}

/// Create the connector for `config.endpoint`.
pub fn create_connector(config: &GatewayConfig) -> Result<Arc<dyn EndpointConnector>> {
    let endpoint = config.endpoint.as_str();

    #[cfg(feature = "opcua")]
    if has_scheme(endpoint, OPC_TCP_SCHEME) {
        return Ok(Arc::new(crate::protocols::opcua::OpcUaConnector::new(config)?));
    }

    if has_scheme(endpoint, VIRTUAL_SCHEME) {
        tracing::info!(connection = %config.connection, "using in-memory endpoint {}", endpoint);
        return Ok(Arc::new(VirtualEndpoint::demo(endpoint)?));
    }

    Err(GatewayError::Config(format!(
        "Unsupported endpoint: {}. Expected {}host:port (requires the opcua feature) or {}name.",
        endpoint, OPC_TCP_SCHEME, VIRTUAL_SCHEME
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_scheme() {
        let config = GatewayConfig::new("virtual://demo");
        assert!(create_connector(&config).is_ok());
        let config = GatewayConfig::new("VIRTUAL://demo");
        assert!(create_connector(&config).is_ok());
    }

    #[test]
    fn test_unknown_scheme() {
        let config = GatewayConfig::new("http://plc:4840");
        assert!(matches!(
            create_connector(&config),
            Err(GatewayError::Config(_))
        ));
    }
}

//! Protocol implementations.
//!
//! Adapters that put a concrete endpoint behind the `EndpointConnector`
//! and `RemoteSession` traits.

pub mod virtual_endpoint;

#[cfg(feature = "opcua")]
#[cfg_attr(docsrs, doc(cfg(feature = "opcua")))]
pub mod opcua;

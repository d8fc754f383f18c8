//! # OPC UA Gateway (uagw)
//!
//! Turns one long-lived OPC UA session into a stateless service that many
//! short-lived clients can share.
//!
//! ## Features
//!
//! - **One process per connection**: each named connection owns one session
//!   and listens on a port derived from its name
//! - **Self-healing session**: keep-alive, failure detection, bounded
//!   reconnect with exponential backoff
//! - **Local control plane**: read, batch read, typed write, browse and info
//!   over JSON/HTTP
//! - **Telemetry output**: line records with numeric-first fields and
//!   32-bit alarm bitmask expansion
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use uagw::prelude::*;
//!
//! let config = GatewayConfig::new("opc.tcp://192.168.1.100:4840")
//!     .with_user_identity("operator", "secret");
//! let connector = create_connector(&config)?;
//! uagw::gateway::service::run(config, connector).await?;
//!
//! // From another process:
//! let client = GatewayClient::for_connection("127.0.0.1", "default", 8765);
//! let reply = client.read(&NodeAddress::parse("ns=2;s=Line1.Speed")?).await?;
//! ```
//!
//! ## Endpoints
//!
//! | Scheme | Adapter | Feature |
//! |--------|---------|---------|
//! | `opc.tcp://` | `protocols::opcua` (async-opcua) | `opcua` (default) |
//! | `virtual://` | `protocols::virtual_endpoint` (in memory) | always |

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod core;
pub mod gateway;
pub mod protocols;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::{encode, extract_bits, BitRecord, TelemetryRecord};
    pub use crate::core::{
        address::{IdKind, NodeAddress},
        data::*,
        error::{GatewayError, Result},
        security::*,
        traits::*,
    };
    pub use crate::gateway::{
        create_connector, port_for, GatewayApi, GatewayClient, GatewayConfig, OutputFormat,
    };
}

// Re-export core types at crate root for convenience
pub use crate::core::address::{IdKind, NodeAddress};
pub use crate::core::data::{DataType, Value};
pub use crate::core::error::{GatewayError, Result};
pub use crate::core::security::{AuthMethod, Identity, SecurityMode, SecurityPolicy};
pub use crate::core::traits::{EndpointConnector, RemoteSession, SessionState};

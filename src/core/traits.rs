//! Core traits for the remote endpoint collaborator.
//!
//! The gateway never speaks the wire protocol itself. It talks to a
//! connector that negotiates sessions and to the sessions it returns.
//!
//! # Trait Hierarchy
//!
//! ```text
//! EndpointConnector   // discover offers, open a session on one of them
//! └── RemoteSession   // read, write, attributes, references, close
//! ```
//!
//! Both traits use `async_trait` because the session handle is stored as
//! `Arc<dyn RemoteSession>` and swapped at runtime.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::address::NodeAddress;
use crate::core::data::Value;
use crate::core::error::Result;
use crate::core::security::{EndpointOffer, Identity};

/// Lifecycle state of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session handle installed.
    #[default]
    Disconnected,

    /// Negotiating an endpoint and opening a session.
    Connecting,

    /// Session installed and operational.
    Connected,

    /// Broken session detected; retry cycle in progress.
    Reconnecting,
}

impl SessionState {
    /// Check if currently connected.
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a session is being established.
    #[inline]
    pub const fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Protocol-level node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeClass {
    #[default]
    Unspecified,
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

/// Relationship kinds followed by browse, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// Composition (HasComponent).
    HasComponent,
    /// Organization (Organizes).
    Organizes,
    /// Property (HasProperty).
    HasProperty,
}

impl ReferenceKind {
    pub const BROWSE_ORDER: [ReferenceKind; 3] =
        [Self::HasComponent, Self::Organizes, Self::HasProperty];
}

/// Access level bit for "current value writable".
pub const ACCESS_LEVEL_CURRENT_WRITE: u8 = 0x02;

/// Attributes read for each node visited by browse.
///
/// Attributes the server does not report stay `None`/empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAttributes {
    pub node_class: NodeClass,
    pub browse_name: String,
    pub description: String,
    pub access_level: Option<u8>,
    /// Data type name (write tag name for builtin scalars).
    pub data_type: Option<String>,
}

impl NodeAttributes {
    /// True when the current value is writable.
    pub fn writable(&self) -> bool {
        self.access_level
            .is_some_and(|a| a & ACCESS_LEVEL_CURRENT_WRITE == ACCESS_LEVEL_CURRENT_WRITE)
    }
}

/// Status code returned by a remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub code: u32,
    pub name: String,
}

impl RemoteStatus {
    pub fn good() -> Self {
        Self {
            code: 0,
            name: "Good".to_string(),
        }
    }

    pub fn bad(code: u32, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
        }
    }

    /// Severity bits 30..31 zero means Good.
    pub fn is_good(&self) -> bool {
        self.code & 0xC000_0000 == 0
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:08X})", self.name, self.code)
    }
}

/// Session diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub state: SessionState,
    pub read_count: u64,
    pub write_count: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub last_error: Option<String>,
    pub last_keep_alive: Option<DateTime<Utc>>,
}

/// A live session to the remote endpoint.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Read the current value of a node.
    async fn read_value(&self, address: &NodeAddress) -> Result<Value>;

    /// Write a value; the returned status is checked by the caller.
    async fn write_value(&self, address: &NodeAddress, value: &Value) -> Result<RemoteStatus>;

    /// Read the attributes browse needs.
    async fn read_attributes(&self, address: &NodeAddress) -> Result<NodeAttributes>;

    /// Forward references of one kind.
    async fn references(&self, address: &NodeAddress, kind: ReferenceKind)
        -> Result<Vec<NodeAddress>>;

    /// Close the session. Errors are logged and swallowed by callers.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions against one endpoint URL.
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    /// Enumerate the endpoint descriptions the server advertises.
    async fn discover(&self, url: &str) -> Result<Vec<EndpointOffer>>;

    /// Open and activate a session on the chosen endpoint.
    async fn open(&self, offer: &EndpointOffer, identity: &Identity)
        -> Result<Arc<dyn RemoteSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Reconnecting.is_transitioning());
        assert!(!SessionState::Disconnected.is_transitioning());
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert_eq!(SessionState::Connected.to_string(), "connected");
    }

    #[test]
    fn test_writable_bit() {
        let mut attrs = NodeAttributes::default();
        assert!(!attrs.writable());
        attrs.access_level = Some(0x01);
        assert!(!attrs.writable());
        attrs.access_level = Some(0x03);
        assert!(attrs.writable());
    }

    #[test]
    fn test_remote_status() {
        assert!(RemoteStatus::good().is_good());
        let bad = RemoteStatus::bad(0x803B_0000, "BadNotWritable");
        assert!(!bad.is_good());
        assert_eq!(bad.to_string(), "BadNotWritable (0x803B0000)");
        // Uncertain is not Good.
        assert!(!RemoteStatus::bad(0x4000_0000, "Uncertain").is_good());
    }
}

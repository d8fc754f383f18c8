//! Gateway API: read, batch read, write, browse and info.
//!
//! Every operation validates its input before touching the session, then
//! snapshots the live handle and runs the remote call under a timeout with
//! no lock held. Failures that indicate a broken transport raise the
//! session's failure trigger; recovery itself stays with the session loop.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::core::address::NodeAddress;
use crate::core::data::{DataType, Value};
use crate::core::error::{GatewayError, Result};
use crate::core::traits::{Diagnostics, RemoteSession};
use crate::gateway::browse::{self, NodeSummary};
use crate::gateway::session::ConnectionSession;

/// Node reference as sent over the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub identifier: String,
}

impl NodeSpec {
    pub fn address(&self) -> Result<NodeAddress> {
        NodeAddress::new(&self.namespace, &self.kind, &self.identifier)
    }

    /// `ns=<ns>;<type>=<id>` echo of the request, valid or not.
    pub fn node_id(&self) -> String {
        format!("ns={};{}={}", self.namespace, self.kind, self.identifier)
    }
}

impl From<&NodeAddress> for NodeSpec {
    fn from(address: &NodeAddress) -> Self {
        Self {
            namespace: address.namespace().to_string(),
            kind: address.kind().to_string(),
            identifier: address.identifier().to_string(),
        }
    }
}

/// Per-node outcome: a value or an error string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResult {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeResult {
    pub fn from_outcome(node_id: String, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self {
                node_id,
                value: Some(value),
                error: None,
            },
            Err(e) => Self {
                node_id,
                value: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Answer of the info operation.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayInfo {
    pub connection: String,
    pub port: u16,
    pub endpoint: String,
    pub status: String,
    pub diagnostics: Diagnostics,
}

/// Request-facing operations backed by one connection session.
#[derive(Debug, Clone)]
pub struct GatewayApi {
    session: Arc<ConnectionSession>,
}

impl GatewayApi {
    pub fn new(session: Arc<ConnectionSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    fn request_timeout(&self) -> Duration {
        self.session.config().timeouts.request()
    }

    /// Record a remote failure and raise the failure trigger for transport errors.
    fn remote_failed(&self, error: GatewayError) -> GatewayError {
        self.session.record_error(&error);
        if error.is_transport() {
            tracing::debug!(
                connection = %self.session.name(),
                "transport failure on request: {}",
                error
            );
            self.session.signal_failure();
        }
        error
    }

    /// Read one node's current value.
    pub async fn read(&self, address: &NodeAddress) -> Result<Value> {
        address.validate()?;
        let handle = self.session.snapshot()?;
        self.read_with(handle.as_ref(), address).await
    }

    async fn read_with(&self, handle: &dyn RemoteSession, address: &NodeAddress) -> Result<Value> {
        let timeout = self.request_timeout();
        let outcome = tokio::time::timeout(timeout, handle.read_value(address))
            .await
            .map_err(|_| GatewayError::timeout("read", timeout))
            .and_then(|r| r);

        match outcome {
            Ok(value) => {
                self.session.record_read();
                Ok(value)
            }
            Err(e) => Err(match self.remote_failed(e) {
                e @ (GatewayError::RemoteReadFailed(_) | GatewayError::Timeout { .. }) => e,
                other => GatewayError::RemoteReadFailed(other.to_string()),
            }),
        }
    }

    /// Read several nodes concurrently; results keep the input order.
    ///
    /// Item failures, including malformed addresses, are reported per item.
    /// An empty request or a missing session fails the whole batch.
    pub async fn batch_read(&self, nodes: &[NodeSpec]) -> Result<Vec<NodeResult>> {
        if nodes.is_empty() {
            return Err(GatewayError::BadRequest("no nodes specified in request".into()));
        }
        let handle = self.session.snapshot()?;
        let reads = nodes.iter().map(|spec| {
            let handle = handle.clone();
            async move {
                let outcome = match spec.address().and_then(|a| a.validate().map(|_| a)) {
                    Ok(address) => self.read_with(handle.as_ref(), &address).await,
                    Err(e) => Err(e),
                };
                NodeResult::from_outcome(spec.node_id(), outcome)
            }
        });
        Ok(join_all(reads).await)
    }

    /// Parse `raw` under `data_type` and write it.
    ///
    /// Returns the typed value that was written.
    pub async fn write(&self, address: &NodeAddress, raw: &str, data_type: &str) -> Result<Value> {
        let tag: DataType = data_type.parse()?;
        let value = tag.parse_value(raw)?;
        address.validate()?;
        tracing::debug!(
            connection = %self.session.name(),
            "write {} = {} ({})",
            address,
            value,
            tag.as_str()
        );

        let handle = self.session.snapshot()?;
        let timeout = self.request_timeout();
        let outcome = tokio::time::timeout(timeout, handle.write_value(address, &value))
            .await
            .map_err(|_| GatewayError::timeout("write", timeout))
            .and_then(|r| r);

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                return Err(match self.remote_failed(e) {
                    e @ (GatewayError::RemoteWriteFailed(_) | GatewayError::Timeout { .. }) => e,
                    other => GatewayError::RemoteWriteFailed(other.to_string()),
                })
            }
        };

        if !status.is_good() {
            let err = GatewayError::RemoteWriteFailed(format!("status {}", status));
            self.session.record_error(&err);
            return Err(err);
        }
        self.session.record_write();
        Ok(value)
    }

    /// Browse variables below `root` (`i=84` style roots allowed).
    pub async fn browse(&self, root: &str, max_depth: u32) -> Result<Vec<NodeSummary>> {
        let root = NodeAddress::parse_browse_root(root)?;
        root.validate()?;
        let handle = self.session.snapshot()?;

        let timeout = self.session.config().timeouts.browse();
        tokio::time::timeout(timeout, browse::browse(handle.as_ref(), &root, max_depth))
            .await
            .map_err(|_| GatewayError::timeout("browse", timeout))
            .and_then(|r| r)
            .map_err(|e| self.remote_failed(e))
    }

    /// Connection name, port, endpoint and session health.
    ///
    /// Never touches the remote endpoint.
    pub fn info(&self) -> GatewayInfo {
        let diagnostics = self.session.diagnostics();
        GatewayInfo {
            connection: self.session.name().to_string(),
            port: self.session.port(),
            endpoint: self.session.endpoint().to_string(),
            status: diagnostics.state.to_string(),
            diagnostics,
        }
    }
}

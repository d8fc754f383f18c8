//! Recursive address-space browse.
//!
//! Depth-first descent from a root node. Every visited node's attributes are
//! read; only `Variable` nodes are emitted, containers are traversed. Children
//! are followed through `HasComponent`, then `Organizes`, then `HasProperty`.
//!
//! A node reachable through two reference kinds from the same parent is
//! visited, and emitted, once per path. Callers needing exactly-once results
//! deduplicate on `node_id`.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::codec::line_protocol::NodeSummaryView;
use crate::core::address::NodeAddress;
use crate::core::error::Result;
use crate::core::traits::{NodeClass, ReferenceKind, RemoteSession};

/// Default root when the caller names none.
pub const DEFAULT_ROOT: &str = "i=84";

/// Default depth of the control plane.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

/// One emitted variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub node_id: String,
    pub browse_name: String,
    /// Browse names from the root down, joined with `.`.
    pub path: String,
    pub data_type: String,
    pub writable: bool,
    pub description: String,
}

impl NodeSummary {
    /// Borrowed view for the line-record encoder.
    pub fn view(&self) -> NodeSummaryView<'_> {
        NodeSummaryView {
            node_id: &self.node_id,
            path: &self.path,
            data_type: &self.data_type,
            writable: self.writable,
            description: &self.description,
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Browse from `root` down to `max_depth` levels below it.
///
/// The root is level 0. The first failing attribute or reference lookup
/// aborts the whole browse.
pub async fn browse(
    session: &dyn RemoteSession,
    root: &NodeAddress,
    max_depth: u32,
) -> Result<Vec<NodeSummary>> {
    let mut out = Vec::new();
    visit(session, root.clone(), String::new(), 0, max_depth, &mut out).await?;
    Ok(out)
}

fn visit<'a>(
    session: &'a dyn RemoteSession,
    node: NodeAddress,
    parent_path: String,
    level: u32,
    max_depth: u32,
    out: &'a mut Vec<NodeSummary>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if level > max_depth {
            return Ok(());
        }

        let attrs = session.read_attributes(&node).await?;
        let path = join_path(&parent_path, &attrs.browse_name);

        if attrs.node_class == NodeClass::Variable {
            out.push(NodeSummary {
                node_id: node.to_string(),
                browse_name: attrs.browse_name.clone(),
                path: path.clone(),
                data_type: attrs.data_type.clone().unwrap_or_default(),
                writable: attrs.writable(),
                description: attrs.description.clone(),
            });
        }

        for kind in ReferenceKind::BROWSE_ORDER {
            let children = session.references(&node, kind).await?;
            for child in children {
                visit(session, child, path.clone(), level + 1, max_depth, out).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::Value;
    use crate::core::security::Identity;
    use crate::core::traits::EndpointConnector;
    use crate::protocols::virtual_endpoint::VirtualEndpoint;
    use std::sync::Arc;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse_browse_root(s).unwrap()
    }

    async fn open(endpoint: &VirtualEndpoint) -> Arc<dyn RemoteSession> {
        let offers = endpoint.discover(endpoint.url()).await.unwrap();
        endpoint.open(&offers[0], &Identity::Anonymous).await.unwrap()
    }

    fn plant() -> VirtualEndpoint {
        let endpoint = VirtualEndpoint::new("virtual://browse");
        endpoint.insert_object("ns=2;s=Line", "Line").unwrap();
        endpoint.add_reference("ns=0;i=85", ReferenceKind::Organizes, "ns=2;s=Line").unwrap();
        endpoint.insert_object("ns=2;s=Line.Drive", "Drive").unwrap();
        endpoint
            .add_reference("ns=2;s=Line", ReferenceKind::HasComponent, "ns=2;s=Line.Drive")
            .unwrap();
        endpoint
            .insert_variable("ns=2;s=Line.Drive.Rpm", "Rpm", Value::Double(1450.0), false)
            .unwrap();
        endpoint
            .add_reference("ns=2;s=Line.Drive", ReferenceKind::HasComponent, "ns=2;s=Line.Drive.Rpm")
            .unwrap();
        endpoint
            .insert_variable("ns=2;s=Line.Mode", "Mode", Value::Int32(2), true)
            .unwrap();
        endpoint
            .add_reference("ns=2;s=Line", ReferenceKind::HasProperty, "ns=2;s=Line.Mode")
            .unwrap();
        endpoint
    }

    #[tokio::test]
    async fn test_emits_only_variables_with_paths() {
        let endpoint = plant();
        let session = open(&endpoint).await;
        let nodes = browse(session.as_ref(), &addr("i=84"), 10).await.unwrap();

        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, ["Root.Objects.Line.Drive.Rpm", "Root.Objects.Line.Mode"]);
        assert_eq!(nodes[0].node_id, "ns=2;s=Line.Drive.Rpm");
        assert_eq!(nodes[0].data_type, "double");
        assert!(!nodes[0].writable);
        assert!(nodes[1].writable);
    }

    #[tokio::test]
    async fn test_depth_bound() {
        let endpoint = plant();
        let session = open(&endpoint).await;

        // Root(0) Objects(1) Line(2) Mode(3) Drive(3) Rpm(4)
        let nodes = browse(session.as_ref(), &addr("i=84"), 3).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].browse_name, "Mode");

        let nodes = browse(session.as_ref(), &addr("i=84"), 0).await.unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_variable_root_is_emitted() {
        let endpoint = plant();
        let session = open(&endpoint).await;
        let nodes = browse(session.as_ref(), &addr("ns=2;s=Line.Mode"), 0).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].path, "Mode");
    }

    #[tokio::test]
    async fn test_no_deduplication_across_reference_kinds() {
        let endpoint = plant();
        endpoint
            .add_reference("ns=2;s=Line", ReferenceKind::Organizes, "ns=2;s=Line.Mode")
            .unwrap();
        let session = open(&endpoint).await;
        let nodes = browse(session.as_ref(), &addr("ns=2;s=Line"), 5).await.unwrap();
        let modes = nodes.iter().filter(|n| n.browse_name == "Mode").count();
        assert_eq!(modes, 2);
    }

    #[tokio::test]
    async fn test_unknown_root_fails() {
        let endpoint = plant();
        let session = open(&endpoint).await;
        assert!(browse(session.as_ref(), &addr("ns=9;s=Nope"), 3).await.is_err());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "Root"), "Root");
        assert_eq!(join_path("Root", "Objects"), "Root.Objects");
    }
}

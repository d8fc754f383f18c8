//! In-memory endpoint.
//!
//! `VirtualEndpoint` implements the collaborator traits over a small
//! address space held in `DashMap`s. It advertises configurable endpoint
//! offers and can simulate an unreachable server, a server restart that
//! kills existing sessions, failing reads and slow reads.
//!
//! It backs the test suite and the `virtual://` endpoint scheme.
//!
//! # Example
//!
//! ```rust,ignore
//! let endpoint = VirtualEndpoint::new("virtual://plc");
//! endpoint.insert_variable("ns=2;s=Line1.Speed", "Speed", Value::Double(12.5), true)?;
//! endpoint.add_reference("ns=0;i=85", ReferenceKind::Organizes, "ns=2;s=Line1.Speed")?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::core::address::NodeAddress;
use crate::core::data::Value;
use crate::core::error::{GatewayError, Result};
use crate::core::security::{AuthMethod, EndpointOffer, Identity, SecurityMode, SecurityPolicy};
use crate::core::traits::{
    EndpointConnector, NodeAttributes, NodeClass, ReferenceKind, RemoteSession, RemoteStatus,
    ACCESS_LEVEL_CURRENT_WRITE,
};
use crate::gateway::session::SERVER_TIME_NODE;

const BAD_NODE_ID_UNKNOWN: u32 = 0x8034_0000;
const BAD_NOT_WRITABLE: u32 = 0x803B_0000;
const BAD_TYPE_MISMATCH: u32 = 0x8074_0000;

/// Well-known root folder (`i=84`).
pub const ROOT_FOLDER: u32 = 84;
/// Well-known objects folder (`i=85`).
pub const OBJECTS_FOLDER: u32 = 85;

#[derive(Debug, Clone)]
struct VirtualNode {
    attributes: NodeAttributes,
    value: Value,
}

#[derive(Debug)]
struct VirtualState {
    url: String,
    offers: RwLock<Vec<EndpointOffer>>,
    credentials: RwLock<Option<(String, String)>>,
    nodes: DashMap<NodeAddress, VirtualNode>,
    references: DashMap<(NodeAddress, ReferenceKind), Vec<NodeAddress>>,
    write_status: DashMap<NodeAddress, RemoteStatus>,
    online: AtomicBool,
    fail_reads: AtomicBool,
    read_delay: RwLock<Option<Duration>>,
    /// Bumped on restart; sessions from older generations are dead.
    generation: AtomicU64,
    discover_count: AtomicU64,
    open_count: AtomicU64,
    read_count: AtomicU64,
    closed_count: AtomicU64,
}

/// In-memory endpoint. Cloning shares the address space.
#[derive(Debug, Clone)]
pub struct VirtualEndpoint {
    state: Arc<VirtualState>,
}

impl VirtualEndpoint {
    /// Create an endpoint with the root and objects folders.
    ///
    /// Advertises one `None/None` offer accepting anonymous and user-name
    /// authentication.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let offer = EndpointOffer::new(
            url.clone(),
            SecurityPolicy::None,
            SecurityMode::None,
            vec![AuthMethod::Anonymous, AuthMethod::UserName],
        );
        let endpoint = Self {
            state: Arc::new(VirtualState {
                url,
                offers: RwLock::new(vec![offer]),
                credentials: RwLock::new(None),
                nodes: DashMap::new(),
                references: DashMap::new(),
                write_status: DashMap::new(),
                online: AtomicBool::new(true),
                fail_reads: AtomicBool::new(false),
                read_delay: RwLock::new(None),
                generation: AtomicU64::new(0),
                discover_count: AtomicU64::new(0),
                open_count: AtomicU64::new(0),
                read_count: AtomicU64::new(0),
                closed_count: AtomicU64::new(0),
            }),
        };

        let root = NodeAddress::numeric(0, ROOT_FOLDER);
        let objects = NodeAddress::numeric(0, OBJECTS_FOLDER);
        endpoint.insert_node(root.clone(), object_attributes("Root"), Value::Null);
        endpoint.insert_node(objects.clone(), object_attributes("Objects"), Value::Null);
        endpoint
            .state
            .references
            .insert((root, ReferenceKind::Organizes), vec![objects]);
        endpoint
    }

    /// A small packaging line for demos.
    pub fn demo(url: impl Into<String>) -> Result<Self> {
        let endpoint = Self::new(url);
        let objects = "ns=0;i=85";
        endpoint.insert_object("ns=2;s=Line1", "Line1")?;
        endpoint.add_reference(objects, ReferenceKind::Organizes, "ns=2;s=Line1")?;

        let variables = [
            ("ns=2;s=Line1.Running", "Running", Value::Bool(true), true),
            ("ns=2;s=Line1.Speed", "Speed", Value::Double(12.5), true),
            ("ns=2;s=Line1.Count", "Count", Value::UInt32(1024), false),
            ("ns=2;s=Line1.Alarms", "Alarms", Value::UInt32(134_217_856), false),
            ("ns=2;s=Line1.Recipe", "Recipe", Value::from("PET-500"), true),
        ];
        for (addr, name, value, writable) in variables {
            endpoint.insert_variable(addr, name, value, writable)?;
            endpoint.add_reference("ns=2;s=Line1", ReferenceKind::HasComponent, addr)?;
        }
        endpoint.set_description("ns=2;s=Line1.Speed", "Conveyor speed in m/s")?;
        Ok(endpoint)
    }

    pub fn url(&self) -> &str {
        &self.state.url
    }

    /// Replace the advertised endpoint offers.
    pub fn set_offers(&self, offers: Vec<EndpointOffer>) {
        *self.state.offers.write().unwrap_or_else(|e| e.into_inner()) = offers;
    }

    /// Require these credentials for user-name authentication.
    pub fn set_credentials(&self, username: &str, password: &str) {
        *self.state.credentials.write().unwrap_or_else(|e| e.into_inner()) =
            Some((username.to_string(), password.to_string()));
    }

    fn insert_node(&self, address: NodeAddress, attributes: NodeAttributes, value: Value) {
        self.state.nodes.insert(address, VirtualNode { attributes, value });
    }

    /// Add an object (folder) node.
    pub fn insert_object(&self, address: &str, browse_name: &str) -> Result<()> {
        self.insert_node(NodeAddress::parse(address)?, object_attributes(browse_name), Value::Null);
        Ok(())
    }

    /// Add a variable node holding `value`.
    pub fn insert_variable(
        &self,
        address: &str,
        browse_name: &str,
        value: Value,
        writable: bool,
    ) -> Result<()> {
        let access = if writable {
            0x01 | ACCESS_LEVEL_CURRENT_WRITE
        } else {
            0x01
        };
        let attributes = NodeAttributes {
            node_class: NodeClass::Variable,
            browse_name: browse_name.to_string(),
            description: String::new(),
            access_level: Some(access),
            data_type: data_type_name(&value),
        };
        self.insert_node(NodeAddress::parse(address)?, attributes, value);
        Ok(())
    }

    pub fn set_description(&self, address: &str, description: &str) -> Result<()> {
        let address = NodeAddress::parse(address)?;
        match self.state.nodes.get_mut(&address) {
            Some(mut node) => {
                node.attributes.description = description.to_string();
                Ok(())
            }
            None => Err(GatewayError::Config(format!("no node {}", address))),
        }
    }

    /// Add a forward reference `parent --kind--> child`.
    pub fn add_reference(&self, parent: &str, kind: ReferenceKind, child: &str) -> Result<()> {
        let parent = NodeAddress::parse(parent)?;
        let child = NodeAddress::parse(child)?;
        self.state
            .references
            .entry((parent, kind))
            .or_default()
            .push(child);
        Ok(())
    }

    /// Force the status a write to `address` returns.
    pub fn set_write_status(&self, address: &str, status: RemoteStatus) -> Result<()> {
        self.state
            .write_status
            .insert(NodeAddress::parse(address)?, status);
        Ok(())
    }

    /// Current stored value of a node.
    pub fn value(&self, address: &str) -> Option<Value> {
        let address = NodeAddress::parse(address).ok()?;
        self.state.nodes.get(&address).map(|n| n.value.clone())
    }

    /// Take the server offline (refuses discovery, fails every session call)
    /// or bring it back.
    pub fn set_online(&self, online: bool) {
        if !online {
            self.state.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.state.online.store(online, Ordering::SeqCst);
    }

    /// Kill every open session while staying reachable.
    pub fn restart(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.state.read_delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn discover_count(&self) -> u64 {
        self.state.discover_count.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u64 {
        self.state.open_count.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.state.read_count.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> u64 {
        self.state.closed_count.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.state.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Connection(format!(
                "{}: connection refused",
                self.state.url
            )))
        }
    }
}

fn object_attributes(browse_name: &str) -> NodeAttributes {
    NodeAttributes {
        node_class: NodeClass::Object,
        browse_name: browse_name.to_string(),
        ..NodeAttributes::default()
    }
}

fn data_type_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::Bool(_) => "boolean",
        Value::SByte(_) => "sbyte",
        Value::Byte(_) => "byte",
        Value::Int16(_) => "int16",
        Value::UInt16(_) => "uint16",
        Value::Int32(_) => "int32",
        Value::UInt32(_) => "uint32",
        Value::Int64(_) => "int64",
        Value::UInt64(_) => "uint64",
        Value::Float(_) => "float",
        Value::Double(_) => "double",
        Value::String(_) => "string",
        Value::DateTime(_) => "datetime",
        Value::Null => return None,
    };
    Some(name.to_string())
}

#[async_trait]
impl EndpointConnector for VirtualEndpoint {
    async fn discover(&self, _url: &str) -> Result<Vec<EndpointOffer>> {
        self.state.discover_count.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self
            .state
            .offers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn open(&self, offer: &EndpointOffer, identity: &Identity) -> Result<Arc<dyn RemoteSession>> {
        self.ensure_online()?;
        if !offer.auth_methods.contains(&identity.method()) {
            return Err(GatewayError::Connection("BadIdentityTokenRejected".into()));
        }
        let required = self
            .state
            .credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let (Some((user, pass)), Identity::UserName { username, password }) = (required, identity)
        {
            if &user != username || &pass != password {
                return Err(GatewayError::Connection("BadUserAccessDenied".into()));
            }
        }
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(VirtualSession {
            endpoint: self.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session opened on a `VirtualEndpoint`.
#[derive(Debug)]
pub struct VirtualSession {
    endpoint: VirtualEndpoint,
    generation: u64,
    closed: AtomicBool,
}

impl VirtualSession {
    fn ensure_alive(&self) -> Result<()> {
        self.endpoint.ensure_online()?;
        let state = &self.endpoint.state;
        if self.closed.load(Ordering::SeqCst)
            || state.generation.load(Ordering::SeqCst) != self.generation
        {
            return Err(GatewayError::Connection("BadSessionIdInvalid".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for VirtualSession {
    async fn read_value(&self, address: &NodeAddress) -> Result<Value> {
        let state = &self.endpoint.state;
        state.read_count.fetch_add(1, Ordering::SeqCst);
        let delay = *state.read_delay.read().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_alive()?;

        if state.fail_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::RemoteReadFailed("BadInternalError".into()));
        }
        if *address == NodeAddress::numeric(0, SERVER_TIME_NODE) {
            return Ok(Value::DateTime(Utc::now()));
        }
        state
            .nodes
            .get(address)
            .map(|n| n.value.clone())
            .ok_or_else(|| GatewayError::RemoteReadFailed("BadNodeIdUnknown".into()))
    }

    async fn write_value(&self, address: &NodeAddress, value: &Value) -> Result<RemoteStatus> {
        self.ensure_alive()?;
        let state = &self.endpoint.state;
        if let Some(status) = state.write_status.get(address) {
            return Ok(status.clone());
        }
        let Some(mut node) = state.nodes.get_mut(address) else {
            return Ok(RemoteStatus::bad(BAD_NODE_ID_UNKNOWN, "BadNodeIdUnknown"));
        };
        if !node.attributes.writable() {
            return Ok(RemoteStatus::bad(BAD_NOT_WRITABLE, "BadNotWritable"));
        }
        if !node.value.is_null()
            && std::mem::discriminant(&node.value) != std::mem::discriminant(value)
        {
            return Ok(RemoteStatus::bad(BAD_TYPE_MISMATCH, "BadTypeMismatch"));
        }
        node.value = value.clone();
        Ok(RemoteStatus::good())
    }

    async fn read_attributes(&self, address: &NodeAddress) -> Result<NodeAttributes> {
        self.ensure_alive()?;
        self.endpoint
            .state
            .nodes
            .get(address)
            .map(|n| n.attributes.clone())
            .ok_or_else(|| GatewayError::Protocol(format!("BadNodeIdUnknown: {}", address)))
    }

    async fn references(
        &self,
        address: &NodeAddress,
        kind: ReferenceKind,
    ) -> Result<Vec<NodeAddress>> {
        self.ensure_alive()?;
        Ok(self
            .endpoint
            .state
            .references
            .get(&(address.clone(), kind))
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.endpoint.state.closed_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    async fn open(endpoint: &VirtualEndpoint) -> Arc<dyn RemoteSession> {
        let offers = endpoint.discover(endpoint.url()).await.unwrap();
        endpoint.open(&offers[0], &Identity::Anonymous).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_write() {
        let endpoint = VirtualEndpoint::new("virtual://t");
        endpoint
            .insert_variable("ns=2;s=Speed", "Speed", Value::Double(1.0), true)
            .unwrap();
        let session = open(&endpoint).await;

        assert_eq!(session.read_value(&addr("ns=2;s=Speed")).await.unwrap(), Value::Double(1.0));
        let status = session
            .write_value(&addr("ns=2;s=Speed"), &Value::Double(2.5))
            .await
            .unwrap();
        assert!(status.is_good());
        assert_eq!(endpoint.value("ns=2;s=Speed"), Some(Value::Double(2.5)));
    }

    #[tokio::test]
    async fn test_write_statuses() {
        let endpoint = VirtualEndpoint::new("virtual://t");
        endpoint
            .insert_variable("ns=2;s=Count", "Count", Value::UInt32(1), false)
            .unwrap();
        endpoint
            .insert_variable("ns=2;s=Flag", "Flag", Value::Bool(false), true)
            .unwrap();
        let session = open(&endpoint).await;

        let s = session.write_value(&addr("ns=2;s=Count"), &Value::UInt32(2)).await.unwrap();
        assert_eq!(s.name, "BadNotWritable");
        let s = session.write_value(&addr("ns=2;s=Flag"), &Value::Int32(1)).await.unwrap();
        assert_eq!(s.name, "BadTypeMismatch");
        let s = session.write_value(&addr("ns=2;s=Nope"), &Value::Int32(1)).await.unwrap();
        assert_eq!(s.name, "BadNodeIdUnknown");
    }

    #[tokio::test]
    async fn test_server_time_node() {
        let endpoint = VirtualEndpoint::new("virtual://t");
        let session = open(&endpoint).await;
        let v = session.read_value(&NodeAddress::numeric(0, SERVER_TIME_NODE)).await.unwrap();
        assert!(matches!(v, Value::DateTime(_)));
    }

    #[tokio::test]
    async fn test_restart_kills_sessions() {
        let endpoint = VirtualEndpoint::new("virtual://t");
        let session = open(&endpoint).await;
        endpoint.restart();
        let err = session.read_value(&NodeAddress::numeric(0, 2258)).await.unwrap_err();
        assert!(err.is_transport());
        let fresh = open(&endpoint).await;
        assert!(fresh.read_value(&NodeAddress::numeric(0, 2258)).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_refuses_discovery() {
        let endpoint = VirtualEndpoint::new("virtual://t");
        endpoint.set_online(false);
        assert!(matches!(
            endpoint.discover("virtual://t").await,
            Err(GatewayError::Connection(_))
        ));
        assert_eq!(endpoint.discover_count(), 1);
    }

    #[tokio::test]
    async fn test_credentials() {
        let endpoint = VirtualEndpoint::new("virtual://t");
        endpoint.set_credentials("op", "pw");
        let offers = endpoint.discover("virtual://t").await.unwrap();
        let bad = Identity::for_method(AuthMethod::UserName, "op", "nope");
        assert!(endpoint.open(&offers[0], &bad).await.is_err());
        let good = Identity::for_method(AuthMethod::UserName, "op", "pw");
        assert!(endpoint.open(&offers[0], &good).await.is_ok());
    }

    #[tokio::test]
    async fn test_demo_tree() {
        let endpoint = VirtualEndpoint::demo("virtual://demo").unwrap();
        let session = open(&endpoint).await;
        let children = session
            .references(&addr("ns=2;s=Line1"), ReferenceKind::HasComponent)
            .await
            .unwrap();
        assert_eq!(children.len(), 5);
        let attrs = session.read_attributes(&addr("ns=2;s=Line1.Speed")).await.unwrap();
        assert_eq!(attrs.data_type.as_deref(), Some("double"));
        assert!(attrs.writable());
        assert_eq!(attrs.description, "Conveyor speed in m/s");
    }
}

//! OPC UA protocol adapter.
//!
//! Implements `EndpointConnector` and `RemoteSession` on top of
//! `async-opcua`. The gateway owns reconnection, so the client's own
//! session retry is disabled and a dead session simply starts failing calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use uagw::gateway::config::GatewayConfig;
//! use uagw::protocols::opcua::OpcUaConnector;
//!
//! let config = GatewayConfig::new("opc.tcp://192.168.1.100:4840")
//!     .with_user_identity("operator", "secret");
//! let connector = OpcUaConnector::new(&config)?;
//! let offers = connector.discover(&config.endpoint).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opcua::client::{Client, ClientBuilder, IdentityToken, Session};
use opcua::types::{
    AttributeId, BrowseDescription, BrowseDirection, BrowseResult, BrowseResultMask, ByteString,
    DataValue, EndpointDescription, Identifier, MessageSecurityMode, NodeId, ReadValueId,
    ReferenceTypeId, StatusCode, TimestampsToReturn, UAString, UserTokenPolicy, UserTokenType,
    Variant, WriteValue,
};
use tokio::sync::Mutex;

use crate::core::address::{IdKind, NodeAddress};
use crate::core::data::Value;
use crate::core::error::{GatewayError, Result};
use crate::core::security::{AuthMethod, EndpointOffer, Identity, SecurityMode, SecurityPolicy};
use crate::core::traits::{
    EndpointConnector, NodeAttributes, NodeClass, ReferenceKind, RemoteSession, RemoteStatus,
};
use crate::gateway::config::{cert_dir, connection_file_name, GatewayConfig};

// ============================================================================
// Type mapping
// ============================================================================

fn to_message_security_mode(mode: SecurityMode) -> MessageSecurityMode {
    match mode {
        SecurityMode::None => MessageSecurityMode::None,
        SecurityMode::Sign => MessageSecurityMode::Sign,
        SecurityMode::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
    }
}

fn from_message_security_mode(mode: MessageSecurityMode) -> Option<SecurityMode> {
    match mode {
        MessageSecurityMode::None => Some(SecurityMode::None),
        MessageSecurityMode::Sign => Some(SecurityMode::Sign),
        MessageSecurityMode::SignAndEncrypt => Some(SecurityMode::SignAndEncrypt),
        _ => None,
    }
}

fn to_identity_token(identity: &Identity) -> IdentityToken {
    match identity {
        Identity::Anonymous => IdentityToken::Anonymous,
        Identity::UserName { username, password } => {
            IdentityToken::UserName(username.clone(), password.clone())
        }
    }
}

fn to_offer(description: &EndpointDescription) -> Option<EndpointOffer> {
    let mode = from_message_security_mode(description.security_mode)?;
    let auth_methods = description
        .user_identity_tokens
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|t| match t.token_type {
            UserTokenType::Anonymous => Some(AuthMethod::Anonymous),
            UserTokenType::UserName => Some(AuthMethod::UserName),
            _ => None,
        })
        .collect();
    Some(EndpointOffer {
        url: description.endpoint_url.as_ref().to_string(),
        policy_uri: description.security_policy_uri.as_ref().to_string(),
        mode,
        auth_methods,
    })
}

fn to_node_id(address: &NodeAddress) -> Result<NodeId> {
    let ns = address.namespace_index()?;
    Ok(match address.kind() {
        IdKind::Numeric => NodeId::new(ns, address.numeric_id()?),
        IdKind::String => NodeId::new(ns, address.identifier().to_string()),
    })
}

/// Numeric and string node ids only; GUID and opaque ids are not addressable.
fn from_node_id(node_id: &NodeId) -> Option<NodeAddress> {
    match &node_id.identifier {
        Identifier::Numeric(n) => Some(NodeAddress::numeric(node_id.namespace, *n)),
        Identifier::String(s) => Some(NodeAddress::string(node_id.namespace, s.as_ref())),
        _ => None,
    }
}

fn to_variant(value: &Value) -> Result<Variant> {
    Ok(match value {
        Value::Bool(v) => Variant::Boolean(*v),
        Value::SByte(v) => Variant::SByte(*v),
        Value::Byte(v) => Variant::Byte(*v),
        Value::Int16(v) => Variant::Int16(*v),
        Value::UInt16(v) => Variant::UInt16(*v),
        Value::Int32(v) => Variant::Int32(*v),
        Value::UInt32(v) => Variant::UInt32(*v),
        Value::Int64(v) => Variant::Int64(*v),
        Value::UInt64(v) => Variant::UInt64(*v),
        Value::Float(v) => Variant::Float(*v),
        Value::Double(v) => Variant::Double(*v),
        Value::String(s) => Variant::String(UAString::from(s.as_str())),
        Value::DateTime(dt) => Variant::DateTime(Box::new(opcua::types::DateTime::from(*dt))),
        Value::Null => {
            return Err(GatewayError::UnsupportedType("cannot write a null value".into()))
        }
    })
}

fn from_variant(variant: &Variant) -> Value {
    match variant {
        Variant::Boolean(v) => Value::Bool(*v),
        Variant::SByte(v) => Value::SByte(*v),
        Variant::Byte(v) => Value::Byte(*v),
        Variant::Int16(v) => Value::Int16(*v),
        Variant::UInt16(v) => Value::UInt16(*v),
        Variant::Int32(v) => Value::Int32(*v),
        Variant::UInt32(v) => Value::UInt32(*v),
        Variant::Int64(v) => Value::Int64(*v),
        Variant::UInt64(v) => Value::UInt64(*v),
        Variant::Float(v) => Value::Float(*v),
        Variant::Double(v) => Value::Double(*v),
        Variant::String(v) => Value::String(v.as_ref().to_string()),
        Variant::DateTime(dt) => to_chrono(dt)
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        Variant::LocalizedText(t) => Value::String(t.text.as_ref().to_string()),
        Variant::Empty => Value::Null,
        other => Value::String(format!("{:?}", other)),
    }
}

fn to_chrono(dt: &opcua::types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(dt.as_chrono().timestamp_micros())
}

fn to_remote_status(status: StatusCode) -> RemoteStatus {
    RemoteStatus {
        code: status.bits(),
        name: status.to_string(),
    }
}

fn node_class_from(code: i32) -> NodeClass {
    match code {
        1 => NodeClass::Object,
        2 => NodeClass::Variable,
        4 => NodeClass::Method,
        8 => NodeClass::ObjectType,
        16 => NodeClass::VariableType,
        32 => NodeClass::ReferenceType,
        64 => NodeClass::DataType,
        128 => NodeClass::View,
        _ => NodeClass::Unspecified,
    }
}

/// Builtin data type ids (namespace 0) mapped to write tag names.
fn data_type_name(node_id: &NodeId) -> String {
    let builtin = match (node_id.namespace, &node_id.identifier) {
        (0, Identifier::Numeric(id)) => match id {
            1 => Some("boolean"),
            2 => Some("sbyte"),
            3 => Some("byte"),
            4 => Some("int16"),
            5 => Some("uint16"),
            6 => Some("int32"),
            7 => Some("uint32"),
            8 => Some("int64"),
            9 => Some("uint64"),
            10 => Some("float"),
            11 => Some("double"),
            12 => Some("string"),
            13 | 294 => Some("datetime"),
            _ => None,
        },
        _ => None,
    };
    builtin
        .map(str::to_string)
        .unwrap_or_else(|| node_id.to_string())
}

fn reference_type(kind: ReferenceKind) -> NodeId {
    match kind {
        ReferenceKind::HasComponent => ReferenceTypeId::HasComponent.into(),
        ReferenceKind::Organizes => ReferenceTypeId::Organizes.into(),
        ReferenceKind::HasProperty => ReferenceTypeId::HasProperty.into(),
    }
}

fn is_transport_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BadNotConnected
            | StatusCode::BadConnectionClosed
            | StatusCode::BadSessionClosed
            | StatusCode::BadSessionIdInvalid
            | StatusCode::BadSecureChannelClosed
            | StatusCode::BadTimeout
            | StatusCode::BadCommunicationError
    )
}

/// Map a service-level failure: broken transport vs. anything else.
fn service_error(status: StatusCode, otherwise: fn(String) -> GatewayError) -> GatewayError {
    if is_transport_status(status) {
        GatewayError::Connection(status.to_string())
    } else {
        otherwise(status.to_string())
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens `async-opcua` sessions.
pub struct OpcUaConnector {
    client: Mutex<Client>,
    connection: String,
}

impl OpcUaConnector {
    /// Build the client from the gateway configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let (cert_path, key_path) = config.resolved_cert_paths();
        let pki_dir = cert_dir(&config.connection).join(connection_file_name("pki", &config.connection));
        tracing::debug!(
            connection = %config.connection,
            "certificate {} key {}",
            cert_path.display(),
            key_path.display()
        );

        let client = ClientBuilder::new()
            .application_name(&config.application_name)
            .application_uri(&config.application_uri)
            .product_uri(&config.application_uri)
            .certificate_path(&cert_path)
            .private_key_path(&key_path)
            .create_sample_keypair(config.generate_cert)
            .trust_server_certs(config.trust_server_certs)
            .pki_dir(&pki_dir)
            .session_retry_limit(0)
            .client()
            .map_err(|e| GatewayError::Config(e.join(", ")))?;

        Ok(Self {
            client: Mutex::new(client),
            connection: config.connection.clone(),
        })
    }
}

impl std::fmt::Debug for OpcUaConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcUaConnector")
            .field("connection", &self.connection)
            .finish()
    }
}

#[async_trait]
impl EndpointConnector for OpcUaConnector {
    async fn discover(&self, url: &str) -> Result<Vec<EndpointOffer>> {
        let client = self.client.lock().await;
        let descriptions = client
            .get_server_endpoints_from_url(url)
            .await
            .map_err(|e| GatewayError::Connection(format!("get endpoints from {}: {}", url, e)))?;
        Ok(descriptions.iter().filter_map(to_offer).collect())
    }

    async fn open(&self, offer: &EndpointOffer, identity: &Identity) -> Result<Arc<dyn RemoteSession>> {
        let policy = SecurityPolicy::from_uri(&offer.policy_uri).ok_or_else(|| {
            GatewayError::EndpointNegotiationFailed(format!(
                "unsupported security policy {}",
                offer.policy_uri
            ))
        })?;

        let mut client = self.client.lock().await;
        let (session, event_loop) = client
            .connect_to_matching_endpoint(
                (
                    offer.url.as_str(),
                    policy.to_uri().as_str(),
                    to_message_security_mode(offer.mode),
                    UserTokenPolicy::anonymous(),
                ),
                to_identity_token(identity),
            )
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        drop(client);

        let event_loop = event_loop.spawn();
        if !session.wait_for_connection().await {
            event_loop.abort();
            return Err(GatewayError::Connection(format!(
                "session to {} did not activate",
                offer.url
            )));
        }

        Ok(Arc::new(OpcUaSession {
            session,
            event_loop,
        }))
    }
}

// ============================================================================
// Session
// ============================================================================

/// A live `async-opcua` session and its event loop.
pub struct OpcUaSession {
    session: Arc<Session>,
    event_loop: tokio::task::JoinHandle<StatusCode>,
}

impl std::fmt::Debug for OpcUaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcUaSession").finish_non_exhaustive()
    }
}

impl OpcUaSession {
    async fn read_attribute_values(
        &self,
        node_id: &NodeId,
        attributes: &[AttributeId],
    ) -> Result<Vec<DataValue>> {
        let ids: Vec<ReadValueId> = attributes
            .iter()
            .map(|a| ReadValueId {
                node_id: node_id.clone(),
                attribute_id: *a as u32,
                ..Default::default()
            })
            .collect();
        self.session
            .read(&ids, TimestampsToReturn::Neither, 0.0)
            .await
            .map_err(|s| service_error(s, GatewayError::RemoteReadFailed))
    }

    async fn browse_all(&self, description: BrowseDescription) -> Result<Vec<BrowseResult>> {
        let mut results = self
            .session
            .browse(&[description], 0, None)
            .await
            .map_err(|s| service_error(s, GatewayError::Protocol))?;

        let mut continuation = next_continuation(&results);
        while let Some(point) = continuation {
            let more = self
                .session
                .browse_next(false, &[point])
                .await
                .map_err(|s| service_error(s, GatewayError::Protocol))?;
            continuation = next_continuation(&more);
            results.extend(more);
        }
        Ok(results)
    }
}

fn next_continuation(results: &[BrowseResult]) -> Option<ByteString> {
    results
        .last()
        .map(|r| r.continuation_point.clone())
        .filter(|c| !c.is_null() && !c.is_empty())
}

fn good_value(dv: &DataValue) -> Option<&Variant> {
    match dv.status {
        Some(s) if !s.is_good() => None,
        _ => dv.value.as_ref(),
    }
}

#[async_trait]
impl RemoteSession for OpcUaSession {
    async fn read_value(&self, address: &NodeAddress) -> Result<Value> {
        let node_id = to_node_id(address)?;
        let values = self.read_attribute_values(&node_id, &[AttributeId::Value]).await?;
        let dv = values
            .first()
            .ok_or_else(|| GatewayError::RemoteReadFailed("empty read response".into()))?;
        if let Some(status) = dv.status.filter(|s| !s.is_good()) {
            return Err(GatewayError::RemoteReadFailed(status.to_string()));
        }
        Ok(dv.value.as_ref().map(from_variant).unwrap_or_default())
    }

    async fn write_value(&self, address: &NodeAddress, value: &Value) -> Result<RemoteStatus> {
        let write = WriteValue {
            node_id: to_node_id(address)?,
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            value: DataValue::new_now(to_variant(value)?),
        };
        let results = self
            .session
            .write(&[write])
            .await
            .map_err(|s| service_error(s, GatewayError::RemoteWriteFailed))?;
        results
            .first()
            .copied()
            .map(to_remote_status)
            .ok_or_else(|| GatewayError::RemoteWriteFailed("empty write response".into()))
    }

    async fn read_attributes(&self, address: &NodeAddress) -> Result<NodeAttributes> {
        let node_id = to_node_id(address)?;
        let values = self
            .read_attribute_values(
                &node_id,
                &[
                    AttributeId::NodeClass,
                    AttributeId::BrowseName,
                    AttributeId::Description,
                    AttributeId::AccessLevel,
                    AttributeId::DataType,
                ],
            )
            .await
            .map_err(|e| match e {
                GatewayError::RemoteReadFailed(m) => GatewayError::Protocol(m),
                other => other,
            })?;
        let [class, name, description, access, data_type] = values.as_slice() else {
            return Err(GatewayError::Protocol(format!(
                "expected 5 attributes, got {}",
                values.len()
            )));
        };

        let mut attrs = NodeAttributes::default();
        if let Some(Variant::Int32(c)) = good_value(class) {
            attrs.node_class = node_class_from(*c);
        }
        if let Some(Variant::QualifiedName(q)) = good_value(name) {
            attrs.browse_name = q.name.as_ref().to_string();
        }
        if let Some(Variant::LocalizedText(t)) = good_value(description) {
            attrs.description = t.text.as_ref().to_string();
        }
        if let Some(Variant::Byte(a)) = good_value(access) {
            attrs.access_level = Some(*a);
        }
        if let Some(Variant::NodeId(id)) = good_value(data_type) {
            attrs.data_type = Some(data_type_name(id));
        }
        Ok(attrs)
    }

    async fn references(&self, address: &NodeAddress, kind: ReferenceKind) -> Result<Vec<NodeAddress>> {
        let description = BrowseDescription {
            node_id: to_node_id(address)?,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: reference_type(kind),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseResultMask::All as u32,
        };

        let mut children = Vec::new();
        for result in self.browse_all(description).await? {
            if !result.status_code.is_good() {
                return Err(GatewayError::Protocol(format!(
                    "references lookup error: {}",
                    result.status_code
                )));
            }
            for reference in result.references.unwrap_or_default() {
                if reference.node_id.server_index != 0 || !reference.node_id.namespace_uri.is_null() {
                    continue;
                }
                match from_node_id(&reference.node_id.node_id) {
                    Some(child) => children.push(child),
                    None => tracing::debug!(
                        "skipping reference to {} (identifier type not addressable)",
                        reference.node_id.node_id
                    ),
                }
            }
        }
        Ok(children)
    }

    async fn close(&self) -> Result<()> {
        let status = self.session.disconnect().await;
        self.event_loop.abort();
        status.map_err(|s| GatewayError::Connection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_round_trip() {
        let addr = NodeAddress::parse("ns=2;s=Line1.Speed").unwrap();
        let node_id = to_node_id(&addr).unwrap();
        assert_eq!(node_id, NodeId::new(2, "Line1.Speed".to_string()));
        assert_eq!(from_node_id(&node_id), Some(addr));

        let addr = NodeAddress::parse("ns=0;i=2258").unwrap();
        assert_eq!(to_node_id(&addr).unwrap(), NodeId::new(0, 2258u32));
    }

    #[test]
    fn test_node_id_out_of_range() {
        let addr = NodeAddress::parse("ns=70000;i=1").unwrap();
        assert!(to_node_id(&addr).is_err());
    }

    #[test]
    fn test_variant_conversion() {
        assert_eq!(from_variant(&Variant::Double(25.5)), Value::Double(25.5));
        assert_eq!(from_variant(&Variant::Boolean(true)), Value::Bool(true));
        assert_eq!(from_variant(&Variant::UInt32(100)), Value::UInt32(100));
        assert_eq!(from_variant(&Variant::Empty), Value::Null);
        assert!(matches!(to_variant(&Value::Int16(-3)), Ok(Variant::Int16(-3))));
        assert!(to_variant(&Value::Null).is_err());
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(data_type_name(&NodeId::new(0, 1u32)), "boolean");
        assert_eq!(data_type_name(&NodeId::new(0, 294u32)), "datetime");
        assert_eq!(data_type_name(&NodeId::new(3, 3003u32)), "ns=3;i=3003");
    }

    #[test]
    fn test_node_class() {
        assert_eq!(node_class_from(2), NodeClass::Variable);
        assert_eq!(node_class_from(1), NodeClass::Object);
        assert_eq!(node_class_from(0), NodeClass::Unspecified);
    }

    #[test]
    fn test_offer_mapping() {
        let description = EndpointDescription {
            endpoint_url: UAString::from("opc.tcp://plc:4840"),
            security_policy_uri: UAString::from(SecurityPolicy::Basic256Sha256.to_uri().as_str()),
            security_mode: MessageSecurityMode::SignAndEncrypt,
            user_identity_tokens: Some(vec![UserTokenPolicy::anonymous()]),
            ..Default::default()
        };
        let offer = to_offer(&description).unwrap();
        assert_eq!(offer.mode, SecurityMode::SignAndEncrypt);
        assert_eq!(offer.auth_methods, vec![AuthMethod::Anonymous]);
        assert_eq!(offer.policy_name(), "Basic256Sha256");
    }
}

//! Stateless control-plane client and output rendering.
//!
//! A client locates its gateway from the connection name alone (see
//! `registry::port_for`), issues one or more requests and renders the
//! replies as plain text, JSON or line records.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::bitfield::encode_bits_at;
use crate::codec::line_protocol::{encode_at, encode_node_summary, now_nanos};
use crate::core::address::NodeAddress;
use crate::core::data::{DataType, Value};
use crate::core::error::{GatewayError, Result};
use crate::gateway::api::NodeSpec;
use crate::gateway::browse::NodeSummary;
use crate::gateway::registry::{port_for, service_descriptor, start_hint};
use crate::gateway::server::{BatchRequest, WriteRequest};

/// Read and write deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Info deadline.
pub const INFO_TIMEOUT: Duration = Duration::from_secs(2);
/// Browse deadline; large address spaces take a while.
pub const BROWSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Endpoint tag used when the gateway cannot report its endpoint.
pub const UNKNOWN_ENDPOINT: &str = "unknown";

/// Measurement of `set` records.
pub const SET_MEASUREMENT: &str = "opcua_set";
/// Measurement of browse records.
pub const BROWSE_MEASUREMENT: &str = "opcua_node";

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Default,
    /// Raw JSON replies.
    Json,
    /// Line records.
    #[default]
    Influx,
}

/// One node reply as received from the gateway.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeReply {
    #[serde(rename = "nodeID", default)]
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeReply {
    pub fn value(&self) -> Value {
        self.value.as_ref().map(Value::from_json).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct BatchReply {
    #[serde(default)]
    results: Vec<NodeReply>,
}

#[derive(Debug, Deserialize)]
struct BrowseReply {
    #[serde(default)]
    nodes: Vec<NodeSummary>,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

/// Client of one gateway instance.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    host: String,
    port: u16,
    connection: String,
}

impl GatewayClient {
    pub fn new(host: impl Into<String>, port: u16, connection: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
            port,
            connection: connection.into(),
        }
    }

    /// Client for the gateway serving `connection`.
    pub fn for_connection(host: impl Into<String>, connection: &str, base_port: u16) -> Self {
        Self::new(host, port_for(connection, base_port), connection)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    fn transport_error(&self, e: reqwest::Error, timeout: Duration) -> GatewayError {
        if e.is_timeout() {
            return GatewayError::timeout("gateway request", timeout);
        }
        if e.is_connect() {
            return GatewayError::Http(format!(
                "cannot connect to {} on {}:{}: {} (is it running? start it with `{}`)",
                service_descriptor(&self.connection),
                self.host,
                self.port,
                e,
                start_hint(&self.connection)
            ));
        }
        GatewayError::Http(e.to_string())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorReply>(&body)
                .map(|r| r.error)
                .unwrap_or(body);
            return Err(GatewayError::Http(format!("service error ({}): {}", status, message)));
        }
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::Http(format!("error parsing response: {}", e)))
    }

    /// Raw info document.
    pub async fn info(&self) -> Result<serde_json::Value> {
        self.send(self.http.get(self.url("/api/info")), INFO_TIMEOUT).await
    }

    /// Endpoint URL reported by the gateway, or `unknown`.
    pub async fn endpoint_tag(&self) -> String {
        match self.info().await {
            Ok(info) => info
                .get("endpoint")
                .and_then(|e| e.as_str())
                .unwrap_or(UNKNOWN_ENDPOINT)
                .to_string(),
            Err(e) => {
                tracing::debug!("info unavailable: {}", e);
                UNKNOWN_ENDPOINT.to_string()
            }
        }
    }

    pub async fn read(&self, address: &NodeAddress) -> Result<NodeReply> {
        let spec = NodeSpec::from(address);
        let request = self.http.get(self.url("/api/node")).query(&[
            ("namespace", spec.namespace.as_str()),
            ("type", spec.kind.as_str()),
            ("identifier", spec.identifier.as_str()),
        ]);
        self.send(request, REQUEST_TIMEOUT).await
    }

    /// Read one node through the single route, several through the batch route.
    pub async fn read_many(&self, addresses: &[NodeAddress]) -> Result<Vec<NodeReply>> {
        match addresses {
            [] => Err(GatewayError::BadRequest("no node IDs provided".into())),
            [single] => Ok(vec![self.read(single).await?]),
            many => {
                let body = BatchRequest {
                    nodes: many.iter().map(NodeSpec::from).collect(),
                };
                let request = self.http.post(self.url("/api/nodes")).json(&body);
                let reply: BatchReply = self.send(request, REQUEST_TIMEOUT).await?;
                Ok(reply.results)
            }
        }
    }

    pub async fn write(&self, address: &NodeAddress, raw: &str, data_type: &str) -> Result<NodeReply> {
        let body = WriteRequest {
            node: NodeSpec::from(address),
            value: serde_json::Value::String(raw.to_string()),
            data_type: data_type.to_string(),
        };
        let request = self.http.post(self.url("/api/node")).json(&body);
        self.send(request, REQUEST_TIMEOUT).await
    }

    pub async fn browse(&self, root: &str, max_depth: u32) -> Result<Vec<NodeSummary>> {
        let depth = max_depth.to_string();
        let request = self
            .http
            .get(self.url("/api/browse"))
            .query(&[("nodeid", root), ("maxdepth", depth.as_str())]);
        let reply: BrowseReply = self.send(request, BROWSE_TIMEOUT).await?;
        Ok(reply.nodes)
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Line-record options of `get`.
#[derive(Debug, Clone, Default)]
pub struct InfluxOptions {
    pub measurement: String,
    pub endpoint: String,
    pub bits: bool,
    pub bit_names: Option<Vec<String>>,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| GatewayError::Http(e.to_string()))
}

/// Render `get` replies, paired positionally with the requested addresses.
///
/// Default output prints one value per line, failed items as `Error: …`.
/// Line-record output skips failed items.
pub fn render_reads(
    format: OutputFormat,
    addresses: &[NodeAddress],
    replies: &[NodeReply],
    influx: &InfluxOptions,
) -> Result<String> {
    render_reads_at(format, addresses, replies, influx, now_nanos())
}

pub fn render_reads_at(
    format: OutputFormat,
    addresses: &[NodeAddress],
    replies: &[NodeReply],
    influx: &InfluxOptions,
    timestamp_nanos: i64,
) -> Result<String> {
    match format {
        OutputFormat::Json => match replies {
            [single] => to_json(single),
            many => to_json(many),
        },
        OutputFormat::Default => Ok(replies
            .iter()
            .map(|r| match &r.error {
                Some(e) => format!("Error: {}", e),
                None => r.value().to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")),
        OutputFormat::Influx => {
            let mut lines = Vec::new();
            for (address, reply) in addresses.iter().zip(replies) {
                if reply.error.is_some() {
                    continue;
                }
                let value = reply.value();
                if influx.bits {
                    let records = encode_bits_at(
                        &influx.measurement,
                        address,
                        &value,
                        &influx.endpoint,
                        influx.bit_names.as_deref(),
                        timestamp_nanos,
                    )?;
                    lines.extend(records.iter().map(|r| r.to_string()));
                } else {
                    let record = encode_at(
                        &influx.measurement,
                        address,
                        &value,
                        &influx.endpoint,
                        timestamp_nanos,
                    );
                    lines.push(record.to_string());
                }
            }
            Ok(lines.join("\n"))
        }
    }
}

/// Render a successful `set`.
pub fn render_write(
    format: OutputFormat,
    address: &NodeAddress,
    raw: &str,
    data_type: &str,
    reply: &NodeReply,
    client: &GatewayClient,
    endpoint: &str,
) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(reply),
        OutputFormat::Default => Ok(format!(
            "Successfully set {} to {} with type {} (via {}:{})",
            address,
            reply.value(),
            data_type,
            client.host(),
            client.port()
        )),
        OutputFormat::Influx => {
            let value = data_type.parse::<DataType>()?.parse_value(raw)?;
            Ok(encode_at(SET_MEASUREMENT, address, &value, endpoint, now_nanos()).to_string())
        }
    }
}

/// Render browse results.
pub fn render_browse(
    format: OutputFormat,
    nodes: &[NodeSummary],
    endpoint: &str,
    timestamp_nanos: i64,
) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(nodes),
        OutputFormat::Influx => Ok(nodes
            .iter()
            .map(|n| encode_node_summary(BROWSE_MEASUREMENT, n.view(), endpoint, timestamp_nanos))
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")),
        OutputFormat::Default => Ok(browse_table(nodes)),
    }
}

fn browse_table(nodes: &[NodeSummary]) -> String {
    let header = ["Path", "NodeID", "DataType", "Writable", "Description"];
    let rule = ["----", "------", "--------", "--------", "-----------"];
    let mut rows: Vec<[String; 5]> = vec![header.map(String::from), rule.map(String::from)];
    rows.extend(nodes.iter().map(|n| {
        [
            n.path.clone(),
            n.node_id.clone(),
            n.data_type.clone(),
            n.writable.to_string(),
            n.description.replace('\n', " "),
        ]
    }));

    let mut widths = [0usize; 5];
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    rows.iter()
        .map(|row| {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i + 1 == row.len() {
                    line.push_str(cell);
                } else {
                    line.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
                }
            }
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the info document.
pub fn render_info(format: OutputFormat, info: &serde_json::Value) -> Result<String> {
    match format {
        OutputFormat::Json | OutputFormat::Influx => to_json(info),
        OutputFormat::Default => {
            let field = |k: &str| {
                info.get(k)
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .unwrap_or_default()
            };
            let mut lines = vec![
                format!("Connection: {}", field("connection")),
                format!("Port:       {}", field("port")),
                format!("Endpoint:   {}", field("endpoint")),
                format!("Status:     {}", field("status")),
            ];
            if let Some(diag) = info.get("diagnostics").and_then(|d| d.as_object()) {
                for (key, value) in diag {
                    if key != "state" && !value.is_null() {
                        lines.push(format!("  {}: {}", key, value));
                    }
                }
            }
            Ok(lines.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "opc.tcp://plc:4840";

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    fn ok(id: &str, value: serde_json::Value) -> NodeReply {
        NodeReply {
            node_id: id.into(),
            value: Some(value),
            error: None,
        }
    }

    fn failed(id: &str, error: &str) -> NodeReply {
        NodeReply {
            node_id: id.into(),
            value: None,
            error: Some(error.into()),
        }
    }

    fn influx(bits: bool) -> InfluxOptions {
        InfluxOptions {
            measurement: "opcua".into(),
            endpoint: ENDPOINT.into(),
            bits,
            bit_names: None,
        }
    }

    #[test]
    fn test_default_batch_lists_errors_inline() {
        let addresses = [addr("ns=2;s=A"), addr("ns=2;s=B")];
        let replies = [ok("ns=2;s=A", serde_json::json!(12.5)), failed("ns=2;s=B", "BadNodeIdUnknown")];
        let out = render_reads_at(OutputFormat::Default, &addresses, &replies, &influx(false), 1)
            .unwrap();
        assert_eq!(out, "12.5\nError: BadNodeIdUnknown");
    }

    #[test]
    fn test_influx_skips_errors() {
        let addresses = [addr("ns=2;s=A"), addr("ns=2;s=B"), addr("ns=2,s=C")];
        let replies = [
            ok("ns=2;s=A", serde_json::json!(true)),
            failed("ns=2;s=B", "BadNodeIdUnknown"),
            ok("ns=2;s=C", serde_json::json!("hello")),
        ];
        let out = render_reads_at(OutputFormat::Influx, &addresses, &replies, &influx(false), 9)
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r"opcua,node_id=ns\=2;s\=A,endpoint=opc.tcp://plc:4840 value=1 9");
        assert_eq!(
            lines[1],
            r#"opcua,node_id=ns\=2;s\=C,endpoint=opc.tcp://plc:4840 value=1,string_value="hello" 9"#
        );
    }

    #[test]
    fn test_influx_bits() {
        let addresses = [addr("ns=5;s=Alarms")];
        let replies = [ok("ns=5;s=Alarms", serde_json::json!(134_217_856u32))];
        let out = render_reads_at(OutputFormat::Influx, &addresses, &replies, &influx(true), 3)
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 32);
        assert!(lines[7].contains("bit=7,bit_name=bit_7 value=1"));
        assert!(lines[8].contains("bit=8,bit_name=bit_8 value=0"));
    }

    #[test]
    fn test_influx_bits_rejects_text() {
        let addresses = [addr("ns=5;s=Alarms")];
        let replies = [ok("ns=5;s=Alarms", serde_json::json!("nope"))];
        let err = render_reads_at(OutputFormat::Influx, &addresses, &replies, &influx(true), 3)
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedType(_)));
    }

    #[test]
    fn test_browse_table() {
        let nodes = vec![NodeSummary {
            node_id: "ns=2;s=Line1.Speed".into(),
            browse_name: "Speed".into(),
            path: "Root.Objects.Line1.Speed".into(),
            data_type: "double".into(),
            writable: true,
            description: "Conveyor\nspeed".into(),
        }];
        let out = render_browse(OutputFormat::Default, &nodes, ENDPOINT, 0).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Path"));
        assert!(lines[2].ends_with("true      Conveyor speed"));
    }

    #[test]
    fn test_browse_influx() {
        let nodes = vec![NodeSummary {
            node_id: "ns=2;s=Line1.Speed".into(),
            browse_name: "Speed".into(),
            path: "Root.Objects.Line1.Speed".into(),
            data_type: "double".into(),
            writable: false,
            description: "say \"hi\"".into(),
        }];
        let out = render_browse(OutputFormat::Influx, &nodes, ENDPOINT, 5).unwrap();
        assert_eq!(
            out,
            r#"opcua_node,node_id=ns\=2;s\=Line1.Speed,path=Root.Objects.Line1.Speed,data_type=double,endpoint=opc.tcp://plc:4840 writable=0,description="say \"hi\"" 5"#
        );
    }

    #[test]
    fn test_info_default() {
        let info = serde_json::json!({
            "connection": "line1",
            "port": 12345,
            "endpoint": ENDPOINT,
            "status": "connected",
            "diagnostics": {"state": "connected", "read_count": 4, "last_error": null}
        });
        let out = render_info(OutputFormat::Default, &info).unwrap();
        assert!(out.contains("Connection: line1"));
        assert!(out.contains("Port:       12345"));
        assert!(out.contains("read_count: 4"));
        assert!(!out.contains("last_error"));
    }

    #[tokio::test]
    async fn test_refused_connection_hint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = GatewayClient::new("127.0.0.1", port, "line1");
        let err = client.read(&addr("ns=2;s=A")).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("is it running?"));
        assert!(msg.contains("--connection line1"));
        assert_eq!(client.endpoint_tag().await, UNKNOWN_ENDPOINT);
    }
}

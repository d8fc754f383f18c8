//! HTTP control plane.
//!
//! | Route | Method | Operation |
//! |-------|--------|-----------|
//! | `/api/node` | GET | read one node |
//! | `/api/node` | POST | write one node |
//! | `/api/nodes` | POST | batch read |
//! | `/api/browse` | GET | browse variables |
//! | `/api/info` | GET | connection info |
//!
//! Errors travel as JSON bodies (`{"error": …}`, plus `nodeID` on node
//! routes) with the status from `GatewayError::status_code`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::data::Value;
use crate::core::error::{GatewayError, Result};
use crate::gateway::api::{GatewayApi, NodeResult, NodeSpec};
use crate::gateway::browse::{NodeSummary, DEFAULT_MAX_DEPTH, DEFAULT_ROOT};

// ============================================================================
// Wire types
// ============================================================================

/// Body of `POST /api/node`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriteRequest {
    #[serde(flatten)]
    pub node: NodeSpec,
    /// Raw value; non-string JSON scalars are taken as their text form.
    pub value: serde_json::Value,
    #[serde(rename = "dataType", default)]
    pub data_type: String,
}

impl WriteRequest {
    pub fn raw_value(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Body of `POST /api/nodes`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchRequest {
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    results: Vec<NodeResult>,
}

#[derive(Debug, Serialize)]
struct BrowseResponse {
    nodes: Vec<NodeSummary>,
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    nodeid: Option<String>,
    maxdepth: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn status_of(error: &GatewayError) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_response(error: GatewayError) -> Response {
    (status_of(&error), Json(ErrorBody { error: error.to_string() })).into_response()
}

fn node_response(node_id: String, outcome: Result<Value>) -> Response {
    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(e) => status_of(e),
    };
    (status, Json(NodeResult::from_outcome(node_id, outcome))).into_response()
}

fn rejection(rejection: JsonRejection) -> GatewayError {
    GatewayError::BadRequest(rejection.body_text())
}

fn require_components(spec: &NodeSpec) -> Result<()> {
    if spec.namespace.is_empty() || spec.kind.is_empty() || spec.identifier.is_empty() {
        return Err(GatewayError::BadRequest(
            "missing required parameters: namespace, type and identifier".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn read_node(State(api): State<Arc<GatewayApi>>, Query(spec): Query<NodeSpec>) -> Response {
    let node_id = spec.node_id();
    let outcome = match require_components(&spec).and_then(|_| spec.address()) {
        Ok(address) => api.read(&address).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &outcome {
        tracing::debug!(connection = %api.session().name(), "read {} failed: {}", node_id, e);
    }
    node_response(node_id, outcome)
}

async fn write_node(
    State(api): State<Arc<GatewayApi>>,
    payload: std::result::Result<Json<WriteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(r) => return error_response(rejection(r)),
    };
    let node_id = request.node.node_id();
    let outcome = match require_components(&request.node).and_then(|_| request.node.address()) {
        Ok(address) => {
            api.write(&address, &request.raw_value(), &request.data_type)
                .await
        }
        Err(e) => Err(e),
    };
    match &outcome {
        Ok(v) => tracing::info!(connection = %api.session().name(), "wrote {} = {}", node_id, v),
        Err(e) => tracing::warn!(connection = %api.session().name(), "write {} failed: {}", node_id, e),
    }
    node_response(node_id, outcome)
}

async fn read_nodes(
    State(api): State<Arc<GatewayApi>>,
    payload: std::result::Result<Json<BatchRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(r) => return error_response(rejection(r)),
    };
    match api.batch_read(&request.nodes).await {
        Ok(results) => Json(BatchResponse { results }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn browse_nodes(
    State(api): State<Arc<GatewayApi>>,
    Query(query): Query<BrowseQuery>,
) -> Response {
    let root = query
        .nodeid
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ROOT.to_string());
    let max_depth = match query.maxdepth.as_deref() {
        None | Some("") => DEFAULT_MAX_DEPTH,
        Some(text) => text.parse().unwrap_or_else(|_| {
            tracing::debug!("invalid maxdepth '{}', using {}", text, DEFAULT_MAX_DEPTH);
            DEFAULT_MAX_DEPTH
        }),
    };

    tracing::debug!(connection = %api.session().name(), "browse {} depth {}", root, max_depth);
    match api.browse(&root, max_depth).await {
        Ok(nodes) => Json(BrowseResponse { nodes }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn info(State(api): State<Arc<GatewayApi>>) -> Response {
    Json(api.info()).into_response()
}

/// Control-plane router over one gateway.
pub fn router(api: Arc<GatewayApi>) -> Router {
    Router::new()
        .route("/api/node", get(read_node).post(write_node))
        .route("/api/nodes", post(read_nodes))
        .route("/api/browse", get(browse_nodes))
        .route("/api/info", get(info))
        .with_state(api)
}

/// Serve the control plane until `shutdown` resolves.
///
/// In-flight requests are drained after `shutdown`; bounding the drain is
/// up to the caller.
pub async fn serve<F>(api: Arc<GatewayApi>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(api))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(GatewayError::from)
}

//! Per-connection gateway service.
//!
//! One named connection maps to one process: a supervised remote session
//! behind a local JSON control plane, plus the client side of that plane.

pub mod api;
pub mod browse;
pub mod client;
pub mod config;
pub mod factory;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

pub use api::{GatewayApi, GatewayInfo, NodeResult, NodeSpec};
pub use browse::NodeSummary;
pub use client::{GatewayClient, OutputFormat};
pub use config::{GatewayConfig, TimeoutConfig};
pub use factory::create_connector;
pub use registry::port_for;
pub use session::ConnectionSession;

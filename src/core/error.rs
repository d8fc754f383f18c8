//! Error types for the gateway.
//!
//! A single crate-wide error enum. Validation failures (address, declared
//! type, bit names) are produced before any remote call is made.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error taxonomy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Malformed or unsupported node address.
    #[error("invalid node address: {0}")]
    AddressInvalid(String),

    /// No live session handle is installed.
    #[error("not connected to OPC UA server")]
    NotConnected,

    /// Remote read failed; collaborator message is kept verbatim.
    #[error("read failed: {0}")]
    RemoteReadFailed(String),

    /// Remote write failed or returned a non-good status.
    #[error("write failed: {0}")]
    RemoteWriteFailed(String),

    /// Raw write text does not parse under the declared type tag.
    #[error("invalid {tag} value '{value}': {reason}")]
    InvalidValueForType {
        tag: String,
        value: String,
        reason: String,
    },

    /// Declared write type tag is not one of the supported tags.
    #[error("unsupported data type: {0}")]
    UnknownDataType(String),

    /// Value kind cannot enter the bitmask path.
    #[error("value of type {0} cannot be converted to uint32")]
    UnsupportedType(String),

    /// Caller-supplied bit-name list is not exactly 32 long.
    #[error("bit names list must be exactly 32 entries, got {0}")]
    BitNameCountMismatch(usize),

    /// No advertised endpoint matches the requested security and auth.
    #[error("no compatible endpoint found: {0}")]
    EndpointNegotiationFailed(String),

    /// Operation exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Malformed control-plane request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Transport or session establishment failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Other failure reported by the protocol collaborator.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local I/O error.
    #[error("io error: {0}")]
    Io(String),

    /// Control-plane client transport error.
    #[error("http error: {0}")]
    Http(String),
}

impl GatewayError {
    /// Create an `InvalidValueForType` error.
    pub fn invalid_value(tag: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValueForType {
            tag: tag.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a `Timeout` error.
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// True when the error indicates a broken session rather than a bad request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection(_))
    }

    /// True for errors raised by local validation before any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::AddressInvalid(_)
                | Self::InvalidValueForType { .. }
                | Self::UnknownDataType(_)
                | Self::UnsupportedType(_)
                | Self::BitNameCountMismatch(_)
                | Self::BadRequest(_)
        )
    }

    /// HTTP status used when the error crosses the control plane.
    pub fn status_code(&self) -> u16 {
        match self {
            e if e.is_validation() => 400,
            Self::NotConnected => 503,
            Self::Timeout { .. } => 504,
            Self::RemoteReadFailed(_)
            | Self::RemoteWriteFailed(_)
            | Self::EndpointNegotiationFailed(_)
            | Self::Connection(_)
            | Self::Protocol(_) => 502,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

//! Core abstractions for the gateway.
//!
//! Addresses, values, errors, security types and the collaborator traits
//! every other module builds on.

pub mod address;
pub mod data;
pub mod error;
pub mod logging;
pub mod security;
pub mod traits;

pub use address::{IdKind, NodeAddress};
pub use data::*;
pub use error::{GatewayError, Result};
pub use security::*;
pub use traits::*;

//! Gateway configuration.
//!
//! Loaded from an optional TOML file; every field has a default and CLI
//! flags override file values.
//!
//! ```toml
//! connection = "line1"
//! endpoint = "opc.tcp://10.0.0.5:4840"
//! username = "operator"
//! password = "secret"
//! security_policy = "Basic256Sha256"
//! security_mode = "SignAndEncrypt"
//!
//! [timeouts]
//! keep_alive_secs = 30
//! max_reconnect_attempts = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::error::{GatewayError, Result};
use crate::core::security::{AuthMethod, Identity, SecurityMode, SecurityPolicy};
use crate::gateway::registry::{self, DEFAULT_CONNECTION};

/// Default base port for the reserved connection name.
pub const DEFAULT_BASE_PORT: u16 = 8765;

/// Directory name under the per-user config directory.
const CONFIG_DIR_NAME: &str = "uagw";

/// Timeouts and retry policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Endpoint discovery and session open, per attempt.
    pub connect_secs: u64,
    /// Single read or write.
    pub request_secs: u64,
    /// Whole browse traversal.
    pub browse_secs: u64,
    /// Info query.
    pub info_secs: u64,
    pub keep_alive_secs: u64,
    pub max_reconnect_attempts: u32,
    pub backoff_cap_secs: u64,
    /// Grace period for in-flight requests on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            request_secs: 10,
            browse_secs: 30,
            info_secs: 2,
            keep_alive_secs: 30,
            max_reconnect_attempts: 5,
            backoff_cap_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn browse(&self) -> Duration {
        Duration::from_secs(self.browse_secs)
    }

    pub fn info(&self) -> Duration {
        Duration::from_secs(self.info_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Wait after failed attempt `attempt` (0-based): `min(2^attempt, cap)` seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs.min(self.backoff_cap_secs))
    }
}

/// Configuration of one gateway process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Connection name; selects the port.
    pub connection: String,
    /// Port used by the reserved connection name.
    pub base_port: u16,
    /// Control-plane bind address.
    pub host: String,
    /// Remote endpoint URL.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub auth_method: AuthMethod,
    pub security_policy: SecurityPolicy,
    pub security_mode: SecurityMode,
    pub application_name: String,
    pub application_uri: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Create a self-signed keypair when none exists.
    pub generate_cert: bool,
    pub trust_server_certs: bool,
    pub timeouts: TimeoutConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            base_port: DEFAULT_BASE_PORT,
            host: "127.0.0.1".to_string(),
            endpoint: "opc.tcp://localhost:4840".to_string(),
            username: String::new(),
            password: String::new(),
            auth_method: AuthMethod::UserName,
            security_policy: SecurityPolicy::Basic256,
            security_mode: SecurityMode::SignAndEncrypt,
            application_name: "uagw OPC UA Client".to_string(),
            application_uri: "urn:uagw:client".to_string(),
            cert_file: PathBuf::from("cert.pem"),
            key_file: PathBuf::from("key.pem"),
            generate_cert: true,
            trust_server_certs: true,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a configuration for an endpoint with defaults elsewhere.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GatewayError::Config(e.to_string()))
    }

    pub fn with_connection(mut self, name: impl Into<String>) -> Self {
        self.connection = name.into();
        self
    }

    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_user_identity(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth_method = AuthMethod::UserName;
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_anonymous_identity(mut self) -> Self {
        self.auth_method = AuthMethod::Anonymous;
        self
    }

    pub fn with_security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        self.security_policy = policy;
        self.security_mode = mode;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Port this gateway listens on.
    pub fn port(&self) -> u16 {
        registry::port_for(&self.connection, self.base_port)
    }

    pub fn identity(&self) -> Identity {
        Identity::for_method(self.auth_method, &self.username, &self.password)
    }

    /// Reject combinations that can never negotiate.
    pub fn validate(&self) -> Result<()> {
        if self.connection.is_empty() {
            return Err(GatewayError::Config("connection name must not be empty".into()));
        }
        if self.endpoint.is_empty() {
            return Err(GatewayError::Config("endpoint URL must not be empty".into()));
        }
        if self.auth_method == AuthMethod::UserName && self.username.is_empty() {
            return Err(GatewayError::Config(
                "username is required for UserName authentication (or use --auth-method Anonymous)"
                    .into(),
            ));
        }
        let none_policy = self.security_policy == SecurityPolicy::None;
        let none_mode = self.security_mode == SecurityMode::None;
        if none_policy != none_mode {
            return Err(GatewayError::Config(format!(
                "security policy {} cannot be combined with mode {}",
                self.security_policy, self.security_mode
            )));
        }
        Ok(())
    }

    /// Certificate and key paths for this connection.
    ///
    /// Relative paths land in `<config dir>/uagw/`. Non-default connections
    /// get connection-specific file names so that concurrent gateways never
    /// share key material.
    pub fn resolved_cert_paths(&self) -> (PathBuf, PathBuf) {
        let dir = cert_dir(&self.connection);
        (
            resolve_cert_path(&dir, &self.cert_file, &self.connection),
            resolve_cert_path(&dir, &self.key_file, &self.connection),
        )
    }
}

/// Per-user directory for certificates, created on demand.
///
/// Falls back to the current directory when it cannot be created.
pub fn cert_dir(connection: &str) -> PathBuf {
    let Some(base) = dirs::config_dir() else {
        tracing::warn!(connection, "no user config directory, using current directory");
        return PathBuf::from(".");
    };
    let dir = base.join(CONFIG_DIR_NAME);
    match std::fs::create_dir_all(&dir) {
        Ok(()) => dir,
        Err(e) => {
            tracing::warn!(
                connection,
                "could not create {}: {}, using current directory",
                dir.display(),
                e
            );
            PathBuf::from(".")
        }
    }
}

fn resolve_cert_path(dir: &Path, file: &Path, connection: &str) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cert.pem".to_string());
    dir.join(connection_file_name(&name, connection))
}

/// `cert.pem` → `cert-<connection>.pem` for non-default connections.
pub fn connection_file_name(name: &str, connection: &str) -> String {
    if connection == DEFAULT_CONNECTION {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}-{}.{}", stem, connection, ext),
        None => format!("{}-{}", name, connection),
    }
}

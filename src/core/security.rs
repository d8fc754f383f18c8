//! Security and identity types used during endpoint negotiation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, Result};

const POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// Secure-channel security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityPolicy {
    /// No security (development/testing only).
    None,
    Basic128Rsa15,
    #[default]
    Basic256,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    const ALL: [SecurityPolicy; 6] = [
        Self::None,
        Self::Basic128Rsa15,
        Self::Basic256,
        Self::Basic256Sha256,
        Self::Aes128Sha256RsaOaep,
        Self::Aes256Sha256RsaPss,
    ];

    /// Short policy name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        }
    }

    /// Full policy URI as advertised in endpoint descriptions.
    pub fn to_uri(self) -> String {
        format!("{}{}", POLICY_URI_PREFIX, self.name())
    }

    /// Resolve an advertised policy URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let name = uri.strip_prefix(POLICY_URI_PREFIX)?;
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl FromStr for SecurityPolicy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.replace('_', "");
        Self::ALL
            .into_iter()
            .find(|p| p.name().replace('_', "").eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| {
                GatewayError::Config(format!(
                    "unknown security policy '{}'. Use one of: None, Basic128Rsa15, Basic256, Basic256Sha256, Aes128Sha256RsaOaep, Aes256Sha256RsaPss",
                    s
                ))
            })
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    None,
    Sign,
    #[default]
    SignAndEncrypt,
}

impl FromStr for SecurityMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else if s.eq_ignore_ascii_case("sign") {
            Ok(Self::Sign)
        } else if s.eq_ignore_ascii_case("signandencrypt") {
            Ok(Self::SignAndEncrypt)
        } else {
            Err(GatewayError::Config(format!(
                "unknown security mode '{}'. Use one of: None, Sign, SignAndEncrypt",
                s
            )))
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        };
        write!(f, "{}", s)
    }
}

/// User authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthMethod {
    Anonymous,
    #[default]
    UserName,
}

impl FromStr for AuthMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("anonymous") {
            Ok(Self::Anonymous)
        } else if s.eq_ignore_ascii_case("username") {
            Ok(Self::UserName)
        } else {
            Err(GatewayError::Config(format!(
                "unknown auth method '{}'. Use one of: UserName, Anonymous",
                s
            )))
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName => write!(f, "UserName"),
        }
    }
}

/// Credentials presented when activating the session.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    UserName { username: String, password: String },
}

impl Identity {
    /// Build the identity for an auth method.
    pub fn for_method(method: AuthMethod, username: &str, password: &str) -> Self {
        match method {
            AuthMethod::Anonymous => Self::Anonymous,
            AuthMethod::UserName => Self::UserName {
                username: username.to_string(),
                password: password.to_string(),
            },
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Self::Anonymous => AuthMethod::Anonymous,
            Self::UserName { .. } => AuthMethod::UserName,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// One endpoint description advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOffer {
    pub url: String,
    pub policy_uri: String,
    pub mode: SecurityMode,
    /// Authentication methods accepted on this endpoint.
    pub auth_methods: Vec<AuthMethod>,
}

impl EndpointOffer {
    pub fn new(
        url: impl Into<String>,
        policy: SecurityPolicy,
        mode: SecurityMode,
        auth_methods: Vec<AuthMethod>,
    ) -> Self {
        Self {
            url: url.into(),
            policy_uri: policy.to_uri(),
            mode,
            auth_methods,
        }
    }

    /// Short policy name for logs, falling back to the raw URI.
    pub fn policy_name(&self) -> String {
        SecurityPolicy::from_uri(&self.policy_uri)
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| self.policy_uri.clone())
    }
}

impl fmt::Display for EndpointOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth: Vec<String> = self.auth_methods.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "{} {}/{} [{}]",
            self.url,
            self.policy_name(),
            self.mode,
            auth.join(",")
        )
    }
}

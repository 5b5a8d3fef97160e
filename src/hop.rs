//! Hop credentials and the hop list handed to [`ProxyRegistry::open`](crate::proxy::ProxyRegistry::open).
//!
//! A hop list is ordered: `hops[0]` is dialed directly, every later hop is
//! reached through the local-forward tunnel opened at the hop before it.
//!
//! Hop lists can be given either as a parsed `Vec<HopCredential>` or as the
//! JSON array the surrounding automation glue usually passes around:
//!
//! ```rust
//! use pivotsocks::hop::HopSpec;
//!
//! let spec = HopSpec::from(r#"[{"ip": "10.0.0.1", "port": 22, "username": "ops", "password": "s3cret"}]"#);
//! let hops = spec.resolve().unwrap();
//! assert_eq!(hops[0].host, "10.0.0.1");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProxyError;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const LOOPBACK: &str = "127.0.0.1";

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A `host:port` pair. Hosts are kept as strings because they are resolved
/// on the far side of a transport, never locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn loopback(port: u16) -> Self {
        Self::new(LOOPBACK, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Address and authentication material for one SSH hop.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct HopCredential {
    #[serde(alias = "ip")]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(alias = "password")]
    pub secret: String,
}

impl HopCredential {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl fmt::Debug for HopCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A hop list as supplied by a caller: already parsed, or still serialized.
#[derive(Debug, Clone)]
pub enum HopSpec {
    List(Vec<HopCredential>),
    Json(String),
}

impl HopSpec {
    /// Decodes (if needed) and validates the hop list. Nothing touches the
    /// network here; every failure is a [`ProxyError::Config`].
    pub fn resolve(self) -> crate::Result<Vec<HopCredential>> {
        let hops = match self {
            HopSpec::List(hops) => hops,
            HopSpec::Json(raw) => serde_json::from_str(&raw)
                .map_err(|err| ProxyError::Config(format!("hop list is not valid JSON: {err}")))?,
        };
        validate_hops(&hops)?;
        Ok(hops)
    }
}

impl From<Vec<HopCredential>> for HopSpec {
    fn from(value: Vec<HopCredential>) -> Self {
        HopSpec::List(value)
    }
}

impl From<String> for HopSpec {
    fn from(value: String) -> Self {
        HopSpec::Json(value)
    }
}

impl From<&str> for HopSpec {
    fn from(value: &str) -> Self {
        HopSpec::Json(value.to_owned())
    }
}

pub fn validate_hops(hops: &[HopCredential]) -> crate::Result<()> {
    if hops.is_empty() {
        return Err(ProxyError::Config(
            "hop list must contain at least one hop".into(),
        ));
    }
    for (index, hop) in hops.iter().enumerate() {
        if hop.host.trim().is_empty() {
            return Err(ProxyError::Config(format!("hop {index} has an empty host")));
        }
        if hop.port == 0 {
            return Err(ProxyError::Config(format!("hop {index} has port 0")));
        }
    }
    Ok(())
}

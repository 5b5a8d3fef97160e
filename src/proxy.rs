//! Local SOCKS5 listeners bound to hop chains, looked up by alias.

use serde::Serialize;

mod acceptor;
mod registry;

pub use acceptor::ProxyAcceptor;
pub use registry::{ProxyRegistry, ProxySession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Started,
    Closed,
}

/// Returned by [`ProxyRegistry::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDescriptor {
    pub status: SessionStatus,
    pub listen_port: u16,
    pub alias: String,
    pub tunnel_count: usize,
}

/// Returned by [`ProxyRegistry::close`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub status: SessionStatus,
    pub alias: String,
}

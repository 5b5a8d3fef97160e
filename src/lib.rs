//! # pivotsocks
//!
//! This crate exposes the far end of a chain of SSH hops as a local SOCKS5
//! proxy, so arbitrary client traffic can be pivoted through one or more
//! bastion hosts into a target network.
//!
//! ## How a chain is built
//!
//! Given hops `h0, h1, ..., hN-1`:
//!
//! 1. An SSH session is opened directly to `h0`.
//! 2. For every hop but the last, a local-forward tunnel is started on
//!    `127.0.0.1:<ephemeral>` whose remote end is the *next* hop. The next hop's
//!    SSH session is then dialed through that loopback port.
//! 3. The session to the last hop becomes the *final transport*. Every SOCKS5
//!    CONNECT accepted by the proxy opens a `direct-tcpip` channel on it.
//!
//! A chain of `N` hops therefore owns `N - 1` tunnels. Tunnels are torn down in
//! strict reverse order of creation, because each one carries the traffic of
//! the one created after it.
//!
//! ## SOCKS5 subset
//!
//! Only what CONNECT tunnelling needs:
//!
//! - **Greeting**: `0x05` is required; the proxy always selects "no
//!   authentication required". Access to the loopback port is the trust
//!   boundary.
//! - **Request**: only `CONNECT` (`0x01`). IPv4 and domain-name destinations are
//!   accepted, domain names are resolved by the far end. IPv6 is refused with
//!   `0x08`, other commands with `0x07`.
//! - **Replies** always carry an unspecified bound address (`0.0.0.0:0`).
//!
//! ## Example
//!
//! ```rust,no_run
//! use pivotsocks::{hop::HopCredential, proxy::ProxyRegistry, ssh::SshConnector};
//!
//! #[tokio::main]
//! async fn main() -> pivotsocks::Result<()> {
//!     let registry = ProxyRegistry::new(SshConnector::default());
//!
//!     let hops = vec![
//!         HopCredential::new("192.168.1.10", 22, "user1", "pass1"),
//!         HopCredential::new("10.0.0.20", 22, "user2", "pass2"),
//!     ];
//!     let session = registry.open("lab", 1080, hops).await?;
//!     assert_eq!(session.tunnel_count, 1);
//!
//!     // curl --socks5-hostname 127.0.0.1:1080 http://10.0.0.30/
//!
//!     registry.close("lab").await?;
//!     Ok(())
//! }
//! ```
//!
//! Hop lists may also be handed over as a JSON string, see [`hop::HopSpec`].
//!
//! ## Errors
//!
//! Failures while building a chain or starting a proxy are returned from
//! [`proxy::ProxyRegistry::open`] only after everything already acquired has
//! been released. Failures inside a single proxied connection ([`Socks5Error`])
//! close that connection and are logged. They never reach the caller of
//! `open`/`close`.

use std::io;

use protocol::Reply;
use thiserror::Error;

pub mod hop;
pub mod protocol;
pub mod proxy;
pub mod relay;
mod socks5_socket;
pub mod ssh;
pub mod transport;
pub mod tunnel;

pub use hop::{Endpoint, HopCredential, HopSpec};
pub use proxy::{CloseReport, ProxyRegistry, SessionDescriptor};
pub use socks5_socket::{Socks5Request, Socks5Socket};

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors surfaced by [`ProxyRegistry::open`] and [`ProxyRegistry::close`].
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid hop configuration: {0}")]
    Config(String),
    #[error("failed to establish hop {hop} via {target}")]
    Tunnel {
        hop: usize,
        target: Endpoint,
        #[source]
        source: HopError,
    },
    #[error("failed to bind SOCKS5 listener on 127.0.0.1:{port}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("a proxy is already open under alias {0:?}")]
    DuplicateAlias(String),
    #[error("no proxy is open under alias {0:?}")]
    UnknownAlias(String),
    #[error("proxy registry has been shut down")]
    ShutDown,
}

/// Why a single hop could not be brought up.
#[derive(Error, Debug)]
pub enum HopError {
    #[error("ssh transport error")]
    Ssh(#[from] russh::Error),
    #[error("authentication rejected for user {username:?}")]
    AuthRejected { username: String },
    #[error("failed to start local forward")]
    Forward(#[source] io::Error),
}

/// Errors local to one proxied client connection.
#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error("malformed SOCKS5 exchange: {0}")]
    Malformed(&'static str),
    #[error("request rejected: {0}")]
    Rejected(#[from] Reply),
    #[error("failed to open channel")]
    ChannelOpen(#[source] io::Error),
    #[error("relay failed")]
    Relay(#[source] io::Error),
    #[error("Error in network operation")]
    IoError(#[from] io::Error),
}

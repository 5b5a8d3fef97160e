//! The seam between the proxy machinery and whatever carries its traffic.
//!
//! A [`Connector`] dials one hop and authenticates, producing a [`Transport`].
//! A transport opens data channels to arbitrary `host:port` destinations
//! reachable from its far end. [`crate::ssh::SshConnector`] is the production
//! implementation. Tests plug in their own.

use std::{future::Future, io};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{hop::Endpoint, HopCredential, HopError};

/// An authenticated connection to one hop.
pub trait Transport: Send + Sync + 'static {
    /// A bidirectional byte stream multiplexed over the transport.
    type Channel: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Opens a CONNECT-style channel to `host:port`, as seen from the far end
    /// of this transport. `host` may be a domain name; it is resolved remotely.
    fn open_channel(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Self::Channel>> + Send;

    /// Tears the transport down. Channels opened on it stop carrying data.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Dials and authenticates hops.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Connects to `target` and authenticates with the credentials in `hop`.
    ///
    /// `target` is `hop`'s own address for the first hop of a chain and a
    /// loopback tunnel port for every later hop.
    fn connect(
        &self,
        target: &Endpoint,
        hop: &HopCredential,
    ) -> impl Future<Output = Result<Self::Transport, HopError>> + Send;
}

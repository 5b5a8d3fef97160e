//! SSH hops backed by `russh`.

use std::{io, sync::Arc};

use russh::{
    client,
    keys::ssh_key::{HashAlg, PublicKey},
    ChannelStream, Disconnect,
};
use tracing::{debug, instrument};

use crate::{
    hop::{Endpoint, LOOPBACK},
    transport::{Connector, Transport},
    HopCredential, HopError,
};

/// Opens password-authenticated SSH sessions.
#[derive(Clone)]
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(client::Config::default())
    }
}

/// Accepts every server key (hops are usually throwaway lab machines whose
/// keys are not pinned) but records the fingerprint.
struct HostKeyLogger {
    target: Endpoint,
}

impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting host key {} from {}",
            server_public_key.fingerprint(HashAlg::Sha256),
            self.target
        );
        Ok(true)
    }
}

impl Connector for SshConnector {
    type Transport = SshTransport;

    #[instrument(skip_all, fields(target = %target, user = %hop.username))]
    async fn connect(
        &self,
        target: &Endpoint,
        hop: &HopCredential,
    ) -> Result<SshTransport, HopError> {
        let handler = HostKeyLogger {
            target: target.clone(),
        };
        let mut handle =
            client::connect(self.config.clone(), (target.host.as_str(), target.port), handler)
                .await?;

        let auth = handle
            .authenticate_password(hop.username.clone(), hop.secret.clone())
            .await?;
        if !auth.success() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(HopError::AuthRejected {
                username: hop.username.clone(),
            });
        }

        debug!("Authenticated");
        Ok(SshTransport {
            handle,
            target: target.clone(),
        })
    }
}

/// An authenticated SSH session to one hop.
pub struct SshTransport {
    handle: client::Handle<HostKeyLogger>,
    target: Endpoint,
}

impl Transport for SshTransport {
    type Channel = ChannelStream<client::Msg>;

    async fn open_channel(&self, host: &str, port: u16) -> io::Result<Self::Channel> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), LOOPBACK, 0)
            .await
            .map_err(io::Error::other)?;
        Ok(channel.into_stream())
    }

    async fn close(&self) {
        if let Err(err) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.target, err);
        }
    }
}

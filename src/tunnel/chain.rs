use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    hop::{Endpoint, HopCredential, LOOPBACK},
    transport::{Connector, Transport},
    HopError, ProxyError,
};

use super::{teardown_tunnels, ChainResult, TunnelHandle};

/// Brings up a chain of hops one at a time.
///
/// For hops `h0..hN-1`, the session to `hi` is dialed at `hi` itself when
/// `i == 0` and at `127.0.0.1:<port of tunnel i-1>` otherwise (tunnels bind
/// on loopback unless [`TunnelChainBuilder::bind_host`] says otherwise). Every hop but the
/// last gets a tunnel to the next hop; the session to the last hop becomes
/// the final transport.
///
/// If any hop fails, the tunnels already created are closed newest first
/// before the error is returned, so a failed build leaves nothing running.
pub struct TunnelChainBuilder<'a, C> {
    connector: &'a C,
    bind_host: String,
}

impl<'a, C> TunnelChainBuilder<'a, C>
where
    C: Connector,
{
    pub fn new(connector: &'a C) -> Self {
        Self {
            connector,
            bind_host: LOOPBACK.to_owned(),
        }
    }

    /// Local address the tunnels listen on.
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    #[instrument(skip_all, fields(hops = hops.len()))]
    pub async fn build(&self, hops: &[HopCredential]) -> crate::Result<ChainResult<C::Transport>> {
        let Some((last, intermediate)) = hops.split_last() else {
            return Err(ProxyError::Config(
                "hop list must contain at least one hop".into(),
            ));
        };

        let mut tunnels: Vec<TunnelHandle<C::Transport>> =
            Vec::with_capacity(intermediate.len());
        for (index, (hop, next)) in intermediate.iter().zip(&hops[1..]).enumerate() {
            let target = dial_target(hop, tunnels.last());
            match self.open_tunnel(index, target, hop, next.endpoint()).await {
                Ok(tunnel) => {
                    info!(
                        "Tunnel {} established: {} -> {}",
                        index + 1,
                        tunnel.local_endpoint(),
                        tunnel.remote_endpoint()
                    );
                    tunnels.push(tunnel);
                }
                Err(err) => {
                    teardown_tunnels(tunnels).await;
                    return Err(err);
                }
            }
        }

        let target = dial_target(last, tunnels.last());
        match self.connector.connect(&target, last).await {
            Ok(transport) => Ok(ChainResult {
                final_transport: Arc::new(transport),
                tunnels,
            }),
            Err(source) => {
                teardown_tunnels(tunnels).await;
                Err(ProxyError::Tunnel {
                    hop: intermediate.len(),
                    target,
                    source,
                })
            }
        }
    }

    async fn open_tunnel(
        &self,
        index: usize,
        target: Endpoint,
        hop: &HopCredential,
        remote: Endpoint,
    ) -> crate::Result<TunnelHandle<C::Transport>> {
        let transport = match self.connector.connect(&target, hop).await {
            Ok(transport) => Arc::new(transport),
            Err(source) => {
                return Err(ProxyError::Tunnel {
                    hop: index,
                    target,
                    source,
                })
            }
        };

        match TunnelHandle::start(transport.clone(), &self.bind_host, remote).await {
            Ok(tunnel) => Ok(tunnel),
            Err(err) => {
                transport.close().await;
                Err(ProxyError::Tunnel {
                    hop: index,
                    target,
                    source: HopError::Forward(err),
                })
            }
        }
    }
}

fn dial_target<T: Transport>(
    hop: &HopCredential,
    previous: Option<&TunnelHandle<T>>,
) -> Endpoint {
    match previous {
        Some(tunnel) => tunnel.local_endpoint().clone(),
        None => hop.endpoint(),
    }
}

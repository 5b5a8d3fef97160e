//! Chains of SSH hops joined by local-forward tunnels.

use std::sync::Arc;

use crate::transport::Transport;

mod chain;
mod forward;

pub use chain::TunnelChainBuilder;
pub use forward::TunnelHandle;

/// A fully built chain: the authenticated transport to the last hop plus the
/// tunnels it is reached through, in creation order.
pub struct ChainResult<T: Transport> {
    pub final_transport: Arc<T>,
    pub tunnels: Vec<TunnelHandle<T>>,
}

impl<T: Transport> ChainResult<T> {
    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Closes the final transport, then every tunnel, newest first.
    pub async fn teardown(self) {
        self.final_transport.close().await;
        teardown_tunnels(self.tunnels).await;
    }
}

/// Closes tunnels in reverse order of creation. Each tunnel's traffic runs
/// through the one before it, so that one has to outlive it.
pub async fn teardown_tunnels<T: Transport>(tunnels: Vec<TunnelHandle<T>>) {
    for tunnel in tunnels.into_iter().rev() {
        tunnel.close().await;
    }
}

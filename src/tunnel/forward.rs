use std::{io, sync::Arc, time::Duration};

use tokio::{
    net::TcpListener,
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    hop::Endpoint,
    relay::relay,
    transport::Transport,
};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One running local-forward tunnel: a loopback listener whose connections are
/// carried over `transport` to `remote`.
///
/// Dropping the handle stops the listener as well, but only [`TunnelHandle::close`]
/// waits for it and disconnects the transport.
pub struct TunnelHandle<T: Transport> {
    local: Endpoint,
    remote: Endpoint,
    transport: Arc<T>,
    shutdown: oneshot::Sender<()>,
    forward_loop: JoinHandle<()>,
}

impl<T: Transport> TunnelHandle<T> {
    /// Binds an OS-assigned port on `bind_host` and starts forwarding to `remote`.
    pub async fn start(transport: Arc<T>, bind_host: &str, remote: Endpoint) -> io::Result<Self> {
        let listener = TcpListener::bind((bind_host, 0)).await?;
        let local = Endpoint::new(bind_host, listener.local_addr()?.port());
        let (shutdown, shutdown_rx) = oneshot::channel();

        let span = info_span!("tunnel", local = %local, remote = %remote);
        let forward_loop = tokio::spawn(
            forward_loop(listener, transport.clone(), remote.clone(), shutdown_rx).instrument(span),
        );

        Ok(Self {
            local,
            remote,
            transport,
            shutdown,
            forward_loop,
        })
    }

    pub fn local_bind_port(&self) -> u16 {
        self.local.port
    }

    /// Where the next hop is dialed.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.remote
    }

    /// Stops accepting, releases the local port, then disconnects the hop.
    pub async fn close(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.forward_loop.await {
            warn!("Forward loop for {} ended abnormally: {}", self.remote, err);
        }
        self.transport.close().await;
        info!(
            "Closed tunnel {} -> {}",
            self.local, self.remote
        );
    }
}

async fn forward_loop<T: Transport>(
    listener: TcpListener,
    transport: Arc<T>,
    remote: Endpoint,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let transport = transport.clone();
                    let remote = remote.clone();
                    tokio::spawn(
                        async move {
                            let channel = match transport.open_channel(&remote.host, remote.port).await {
                                Ok(channel) => channel,
                                Err(err) => {
                                    warn!("Channel to {} failed: {}", remote, err);
                                    return;
                                }
                            };
                            if let Err(err) = relay(stream, channel).await {
                                debug!("Forwarded connection ended: {}", err);
                            }
                        }
                        .instrument(info_span!("forward", %peer)),
                    );
                }
                Err(err) => {
                    warn!("Accept failed: {}", err);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
    debug!("Forward loop stopped");
}

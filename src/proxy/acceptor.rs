use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpSocket},
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{transport::Transport, Socks5Socket};

const LISTEN_BACKLOG: u32 = 128;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Binds the SOCKS5 listener on loopback. Port 0 lets the OS pick; the
/// actual port is returned alongside the listener.
pub(crate) fn bind_listener(port: u16) -> io::Result<(TcpListener, u16)> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
    let listener = socket.listen(LISTEN_BACKLOG)?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// The accept loop of one proxy session. Every accepted client gets its own
/// task running the SOCKS5 exchange and then the relay.
pub struct ProxyAcceptor {
    listen_port: u16,
    running: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    accept_loop: JoinHandle<()>,
}

impl ProxyAcceptor {
    pub fn start<T: Transport>(
        listener: TcpListener,
        listen_port: u16,
        transport: Arc<T>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            transport,
            running.clone(),
            shutdown_rx,
        ));
        info!("SOCKS5 proxy listening on 127.0.0.1:{}", listen_port);

        Self {
            listen_port,
            running,
            shutdown,
            accept_loop,
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops accepting and waits until the listener is dropped, so the port
    /// is free again once this returns. Connections already being relayed
    /// are left alone.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        if let Err(err) = self.accept_loop.await {
            warn!("Accept loop ended abnormally: {}", err);
        }
        info!("SOCKS5 proxy on 127.0.0.1:{} stopped", self.listen_port);
    }
}

async fn accept_loop<T: Transport>(
    listener: TcpListener,
    transport: Arc<T>,
    running: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            biased;

            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };

        let (client, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                warn!("Accept failed: {}", err);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        debug!("Received connection from: {}", peer);
        let transport = transport.clone();
        tokio::spawn(
            async move {
                match Socks5Socket::new(client).run(&*transport).await {
                    Ok(stats) => debug!(
                        "Connection closed, {} bytes up, {} bytes down",
                        stats.client_to_remote, stats.remote_to_client
                    ),
                    Err(err) => warn!("Failed connection: {}", err),
                }
            }
            .instrument(info_span!("connection", %peer)),
        );
    }

    running.store(false, Ordering::SeqCst);
    debug!("Accept loop stopped");
}

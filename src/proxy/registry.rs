use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::{
    hop::{HopCredential, HopSpec},
    transport::{Connector, Transport},
    tunnel::{ChainResult, TunnelChainBuilder},
    ProxyError,
};

use super::{
    acceptor::{bind_listener, ProxyAcceptor},
    CloseReport, SessionDescriptor, SessionStatus,
};

/// A running proxy: its accept loop and the chain it relays through.
pub struct ProxySession<T: Transport> {
    alias: String,
    acceptor: ProxyAcceptor,
    chain: ChainResult<T>,
}

impl<T: Transport> ProxySession<T> {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn listen_port(&self) -> u16 {
        self.acceptor.listen_port()
    }

    pub fn is_running(&self) -> bool {
        self.acceptor.is_running()
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            status: SessionStatus::Started,
            listen_port: self.listen_port(),
            alias: self.alias.clone(),
            tunnel_count: self.chain.tunnel_count(),
        }
    }

    /// Stops the listener, then closes the final transport and the tunnels,
    /// newest first.
    async fn close(self) {
        self.acceptor.stop().await;
        self.chain.teardown().await;
    }
}

enum Slot<T: Transport> {
    /// Alias reserved by an `open` that has not finished yet.
    Opening,
    Running(ProxySession<T>),
}

/// Owns every running proxy session, keyed by alias.
///
/// Create one at startup, share it (for example in an `Arc`) with whatever
/// opens and closes proxies, and call [`ProxyRegistry::shutdown`] before exit.
pub struct ProxyRegistry<C: Connector> {
    connector: C,
    sessions: Mutex<HashMap<String, Slot<C::Transport>>>,
    /// Set by `shutdown`. Read under the `sessions` lock, so an `open`
    /// either commits before the drain sees it or tears itself down.
    shut_down: AtomicBool,
}

impl<C: Connector> ProxyRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sessions: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Builds the hop chain, binds `127.0.0.1:listen_port` and starts
    /// accepting SOCKS5 clients under `alias`.
    ///
    /// The hop list is validated and the alias reserved before any network
    /// activity. If anything fails after the chain is up, the chain is torn
    /// down before the error is returned. Once [`ProxyRegistry::shutdown`] has
    /// started, `open` fails with [`ProxyError::ShutDown`], including an
    /// `open` that was already building its chain.
    #[instrument(skip(self, hops))]
    pub async fn open(
        &self,
        alias: &str,
        listen_port: u16,
        hops: impl Into<HopSpec>,
    ) -> crate::Result<SessionDescriptor> {
        let hops = hops.into().resolve()?;
        let reservation = self.reserve(alias)?;

        let session = self.start_session(alias, listen_port, &hops).await?;
        let descriptor = session.descriptor();
        if let Err(session) = reservation.commit(session) {
            session.close().await;
            info!("Proxy {:?} discarded, registry shut down while opening", alias);
            return Err(ProxyError::ShutDown);
        }

        info!(
            "Proxy {:?} started on 127.0.0.1:{} through {} tunnel(s)",
            alias, descriptor.listen_port, descriptor.tunnel_count
        );
        Ok(descriptor)
    }

    /// Stops the proxy registered under `alias` and releases everything it
    /// holds. The alias is removed first, so concurrent closes of the same
    /// alias cannot both tear it down.
    #[instrument(skip(self))]
    pub async fn close(&self, alias: &str) -> crate::Result<CloseReport> {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(alias) {
                Some(Slot::Running(_)) => sessions.remove(alias),
                _ => None,
            }
        };
        let Some(Slot::Running(session)) = removed else {
            return Err(ProxyError::UnknownAlias(alias.to_owned()));
        };

        session.close().await;
        info!("Proxy {:?} closed", alias);
        Ok(CloseReport {
            status: SessionStatus::Closed,
            alias: alias.to_owned(),
        })
    }

    /// Closes every running session and refuses any further `open`. Sessions
    /// still being opened are discarded by their own `open` call.
    pub async fn shutdown(&self) {
        let running: Vec<ProxySession<C::Transport>> = {
            let mut sessions = self.sessions.lock();
            self.shut_down.store(true, Ordering::SeqCst);
            let aliases: Vec<String> = sessions
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(alias, _)| alias.clone())
                .collect();
            aliases
                .iter()
                .filter_map(|alias| match sessions.remove(alias) {
                    Some(Slot::Running(session)) => Some(session),
                    _ => None,
                })
                .collect()
        };

        for session in running {
            let alias = session.alias.clone();
            session.close().await;
            info!("Proxy {:?} closed", alias);
        }
    }

    pub fn contains(&self, alias: &str) -> bool {
        matches!(self.sessions.lock().get(alias), Some(Slot::Running(_)))
    }

    pub fn is_running(&self, alias: &str) -> bool {
        matches!(
            self.sessions.lock().get(alias),
            Some(Slot::Running(session)) if session.is_running()
        )
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    fn reserve<'a>(&'a self, alias: &'a str) -> crate::Result<Reservation<'a, C::Transport>> {
        let mut sessions = self.sessions.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ProxyError::ShutDown);
        }
        if sessions.contains_key(alias) {
            return Err(ProxyError::DuplicateAlias(alias.to_owned()));
        }
        sessions.insert(alias.to_owned(), Slot::Opening);
        Ok(Reservation {
            sessions: &self.sessions,
            shut_down: &self.shut_down,
            alias,
            committed: false,
        })
    }

    async fn start_session(
        &self,
        alias: &str,
        listen_port: u16,
        hops: &[HopCredential],
    ) -> crate::Result<ProxySession<C::Transport>> {
        let chain = TunnelChainBuilder::new(&self.connector).build(hops).await?;

        let (listener, listen_port) = match bind_listener(listen_port) {
            Ok(bound) => bound,
            Err(source) => {
                chain.teardown().await;
                return Err(ProxyError::Bind {
                    port: listen_port,
                    source,
                });
            }
        };
        let acceptor = ProxyAcceptor::start(listener, listen_port, chain.final_transport.clone());

        Ok(ProxySession {
            alias: alias.to_owned(),
            acceptor,
            chain,
        })
    }
}

/// Holds an alias in the `Opening` state. Dropped without
/// [`Reservation::commit`] (error or cancelled `open`), it frees the alias.
struct Reservation<'a, T: Transport> {
    sessions: &'a Mutex<HashMap<String, Slot<T>>>,
    shut_down: &'a AtomicBool,
    alias: &'a str,
    committed: bool,
}

impl<T: Transport> Reservation<'_, T> {
    /// Registers `session`, or hands it back if the registry was shut down
    /// in the meantime.
    fn commit(mut self, session: ProxySession<T>) -> Result<(), ProxySession<T>> {
        let mut sessions = self.sessions.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(session);
        }
        sessions.insert(self.alias.to_owned(), Slot::Running(session));
        self.committed = true;
        Ok(())
    }
}

impl<T: Transport> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut sessions = self.sessions.lock();
        if matches!(sessions.get(self.alias), Some(Slot::Opening)) {
            sessions.remove(self.alias);
        }
    }
}

#![allow(dead_code)]

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use pivotsocks::{
    transport::{Connector, Transport},
    Endpoint, HopCredential, HopError,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing_subscriber::EnvFilter;

pub const REJECTED_SECRET: &str = "wrong";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected { host: String, target: Endpoint },
    Rejected { host: String, target: Endpoint },
    Closed { host: String },
}

/// Records every connect and close, in order. Hops whose secret is
/// [`REJECTED_SECRET`] fail authentication. Channels are plain TCP
/// connections made from the test process.
#[derive(Clone, Default)]
pub struct MockConnector {
    events: Arc<Mutex<Vec<Event>>>,
    connect_delay: Option<Duration>,
}

impl MockConnector {
    /// Every connect takes `delay` before it completes.
    pub fn slow(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn connected_targets(&self) -> Vec<Endpoint> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Connected { target, .. } | Event::Rejected { target, .. } => Some(target),
                Event::Closed { .. } => None,
            })
            .collect()
    }

    pub fn closed_hosts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Closed { host } => Some(host),
                _ => None,
            })
            .collect()
    }
}

pub struct MockTransport {
    host: String,
    events: Arc<Mutex<Vec<Event>>>,
    closed: AtomicBool,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, target: &Endpoint, hop: &HopCredential) -> Result<MockTransport, HopError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if hop.secret == REJECTED_SECRET {
            self.events.lock().push(Event::Rejected {
                host: hop.host.clone(),
                target: target.clone(),
            });
            return Err(HopError::AuthRejected {
                username: hop.username.clone(),
            });
        }
        self.events.lock().push(Event::Connected {
            host: hop.host.clone(),
            target: target.clone(),
        });
        Ok(MockTransport {
            host: hop.host.clone(),
            events: self.events.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

impl Transport for MockTransport {
    type Channel = TcpStream;

    async fn open_channel(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        TcpStream::connect((host, port)).await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.lock().push(Event::Closed {
                host: self.host.clone(),
            });
        }
    }
}

/// Routes crate logs to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn hops(count: usize) -> Vec<HopCredential> {
    (0..count)
        .map(|i| HopCredential::new(format!("bastion-{i}"), 22, format!("user{i}"), "secret"))
        .collect()
}

/// Echo server on an ephemeral loopback port.
pub async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    port
}

pub async fn port_is_closed(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).await.is_err()
}

/// Greets a SOCKS5 proxy and asserts the no-auth selection.
pub async fn socks_greet(proxy_port: u16) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);
    stream
}

/// CONNECT to 127.0.0.1:`port` through an already greeted stream; returns the reply.
pub async fn socks_connect_ipv4(stream: &mut TcpStream, port: u16) -> [u8; 10] {
    let mut request = vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01];
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.unwrap();
    let mut reply = [0; 10];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

pub async fn assert_echoes(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut echoed = vec![0; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

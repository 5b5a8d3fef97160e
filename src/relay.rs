//! Bidirectional byte pumping between a client socket and a remote channel.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Bytes moved in each direction by [`relay`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

/// Pumps bytes between `client` and `remote` until either side finishes.
///
/// Unlike `tokio::io::copy_bidirectional` there is no half-close: EOF or an
/// error in one direction ends both, and both endpoints are shut down before
/// this returns. Nothing is left running once the call completes.
pub async fn relay<A, B>(client: A, remote: B) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);
    let mut stats = RelayStats::default();

    let res = tokio::select! {
        res = pump(&mut client_read, &mut remote_write, &mut stats.client_to_remote) => {
            debug!("client side finished");
            res
        }
        res = pump(&mut remote_read, &mut client_write, &mut stats.remote_to_client) => {
            debug!("remote side finished");
            res
        }
    };

    // Either direction ending closes both endpoints.
    let _ = client_write.shutdown().await;
    let _ = remote_write.shutdown().await;

    debug!(
        "Relay closed after {} bytes up, {} bytes down",
        stats.client_to_remote, stats.remote_to_client
    );
    res.map(|()| stats)
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

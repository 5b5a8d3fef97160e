use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    protocol::{AddressType, AuthMethod, Command, Reply, SocksSocketAddr, RESERVED, VERSION},
    relay::RelayStats,
    transport::Transport,
    Socks5Error,
};

mod connect;

/// A parsed CONNECT request. Consumed right away to open a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Request {
    pub address_type: AddressType,
    pub target_host: String,
    pub target_port: u16,
}

impl From<SocksSocketAddr> for Socks5Request {
    fn from(value: SocksSocketAddr) -> Self {
        Socks5Request {
            address_type: value.addr.addr_type(),
            target_host: value.addr.to_string(),
            target_port: value.port,
        }
    }
}

/// Server side of one SOCKS5 client connection.
///
/// A connection moves through greeting, request, channel open and relaying.
/// Anything malformed before the request is readable closes the connection
/// silently. A readable but unsupported request is answered with an error
/// reply first.
pub struct Socks5Socket<T> {
    inner: T,
}

impl<T> Socks5Socket<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Runs the whole exchange, relaying through a channel opened on `transport`
    /// until either side hangs up.
    pub async fn run<Tr>(mut self, transport: &Tr) -> Result<RelayStats, Socks5Error>
    where
        Tr: Transport,
    {
        self.negotiate().await?;

        let request = match self.read_request().await {
            Ok(request) => request,
            Err(Socks5Error::Rejected(reply)) => {
                debug!("Rejecting request: {}", reply);
                self.reply(reply).await?;
                return Err(Socks5Error::Rejected(reply));
            }
            Err(err) => return Err(err),
        };

        self.connect(request, transport).await
    }

    /// Reads the greeting and always selects "no authentication required".
    pub async fn negotiate(&mut self) -> Result<(), Socks5Error> {
        let mut header: [u8; 2] = [0; 2];
        self.inner.read_exact(&mut header).await?;
        if header[0] != VERSION {
            return Err(Socks5Error::Malformed("greeting is not SOCKS version 5"));
        }

        let mut methods = vec![0; header[1] as usize];
        self.inner.read_exact(&mut methods).await?;
        trace!(
            "Client offered {:?}",
            methods
                .into_iter()
                .map(AuthMethod::from)
                .collect::<Vec<_>>()
        );

        self.inner
            .write_all(&[VERSION, AuthMethod::NoAuthRequired.to_u8()])
            .await?;
        Ok(())
    }

    /// Reads VER CMD RSV DST.ADDR DST.PORT. The address is read in full even
    /// for a command that is then refused, so the refusal reaches the client.
    pub async fn read_request(&mut self) -> Result<Socks5Request, Socks5Error> {
        let mut header: [u8; 3] = [0; 3];
        self.inner.read_exact(&mut header).await?;
        if header[0] != VERSION {
            return Err(Socks5Error::Malformed("request is not SOCKS version 5"));
        }
        if header[2] != RESERVED {
            trace!("Ignoring non-zero reserved byte {:#04x}", header[2]);
        }

        let command = Command::try_from(header[1]);
        let destination = match (command, SocksSocketAddr::read(&mut self.inner).await) {
            (_, Err(Socks5Error::IoError(err))) => return Err(err.into()),
            (Ok(Command::Connect), destination) => destination?,
            (command, _) => {
                debug!("Refusing command {:#04x} ({:?})", header[1], command.ok());
                return Err(Reply::CommandNotSupported.into());
            }
        };

        debug!("CONNECT {}", destination);
        Ok(destination.into())
    }

    /// Writes a reply with an unspecified bound address; clients of a plain
    /// CONNECT proxy do not use it.
    pub async fn reply(&mut self, reply: Reply) -> Result<(), Socks5Error> {
        let mut bytes = vec![VERSION, reply.to_u8(), RESERVED];
        bytes.extend(SocksSocketAddr::default().to_bytes());
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

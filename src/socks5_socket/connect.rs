use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument, warn};

use crate::{
    protocol::Reply,
    relay::{relay, RelayStats},
    transport::Transport,
    Socks5Error,
};

use super::{Socks5Request, Socks5Socket};

impl<T> Socks5Socket<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[instrument(skip_all, fields(host = %request.target_host, port = request.target_port))]
    pub(crate) async fn connect<Tr>(
        mut self,
        request: Socks5Request,
        transport: &Tr,
    ) -> Result<RelayStats, Socks5Error>
    where
        Tr: Transport,
    {
        let channel = match transport
            .open_channel(&request.target_host, request.target_port)
            .await
        {
            Ok(channel) => channel,
            Err(err) => {
                warn!("Channel open failed: {}", err);
                self.reply(Reply::GeneralFailure).await?;
                return Err(Socks5Error::ChannelOpen(err));
            }
        };

        self.reply(Reply::Success).await?;
        debug!("Channel open, relaying");

        relay(self.inner, channel)
            .await
            .map_err(Socks5Error::Relay)
    }
}

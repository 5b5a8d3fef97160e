use super::Reply;

/// CMD field of a request. Only CONNECT is served; BIND and UDP ASSOCIATE are
/// recognised so refusals can name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl TryFrom<u8> for Command {
    type Error = Reply;

    fn try_from(value: u8) -> Result<Self, Reply> {
        match value {
            0x01 => Ok(Command::Connect),
            0x02 => Ok(Command::Bind),
            0x03 => Ok(Command::UdpAssociate),
            _ => Err(Reply::CommandNotSupported),
        }
    }
}

use std::{fmt, net::Ipv4Addr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Socks5Error;

use super::Reply;

const IPV6_ADDR_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4 = 0x01,
    DomainName = 0x03,
    Ipv6 = 0x04,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AddressType::Ipv4),
            0x03 => Some(AddressType::DomainName),
            0x04 => Some(AddressType::Ipv6),
            _ => None,
        }
    }

    pub fn to_u8(&self) -> u8 {
        *self as u8
    }
}

/// Destination of a CONNECT request. Domain names are not resolved here;
/// they travel as-is to the far end of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl Addr {
    pub fn addr_type(&self) -> AddressType {
        match self {
            Addr::Ipv4(_) => AddressType::Ipv4,
            Addr::Domain(_) => AddressType::DomainName,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Ipv4(addr) => write!(f, "{}", addr),
            Addr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksSocketAddr {
    pub port: u16,
    pub addr: Addr,
}

impl Default for SocksSocketAddr {
    fn default() -> Self {
        SocksSocketAddr {
            port: 0,
            addr: Addr::Ipv4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for SocksSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl SocksSocketAddr {
    /// Reads ATYP+ADDR+PORT.
    ///
    /// IPv6 destinations are consumed but refused with
    /// [`Reply::AddressTypeNotSupported`], as is any unknown address type.
    pub async fn read<R>(reader: &mut R) -> Result<Self, Socks5Error>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = reader.read_u8().await?;
        let addr = match AddressType::from_u8(atyp) {
            Some(AddressType::Ipv4) => {
                let mut octets = [0; 4];
                reader.read_exact(&mut octets).await?;
                Addr::Ipv4(Ipv4Addr::from(octets))
            }
            Some(AddressType::DomainName) => {
                let len = reader.read_u8().await?;
                if len == 0 {
                    return Err(Socks5Error::Rejected(Reply::GeneralFailure));
                }
                let mut buf = vec![0; len as usize];
                reader.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf)
                    .map_err(|_| Socks5Error::Rejected(Reply::GeneralFailure))?;
                Addr::Domain(domain)
            }
            Some(AddressType::Ipv6) => {
                let mut rest = [0; IPV6_ADDR_LEN + 2];
                reader.read_exact(&mut rest).await?;
                return Err(Socks5Error::Rejected(Reply::AddressTypeNotSupported));
            }
            None => return Err(Socks5Error::Rejected(Reply::AddressTypeNotSupported)),
        };
        let port = reader.read_u16().await?;

        Ok(SocksSocketAddr { port, addr })
    }

    /// Turns `Self` into: AddrType+ADDR+PORT
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(7);

        bytes.push(self.addr.addr_type().to_u8());

        match &self.addr {
            Addr::Ipv4(addr) => bytes.extend_from_slice(&addr.octets()[..]),
            Addr::Domain(domain) => {
                let domain = &domain.as_bytes()[..domain.len().min(u8::MAX as usize)];
                bytes.push(domain.len() as u8);
                bytes.extend_from_slice(domain)
            }
        }
        bytes.extend_from_slice(&self.port.to_be_bytes());

        bytes
    }
}

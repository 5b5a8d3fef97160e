use thiserror::Error;

/// REP values this proxy sends. Every reply other than [`Reply::Success`] is
/// followed by closing the client connection.
#[repr(u8)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    #[error("succeeded")]
    Success = 0x00,
    #[error("general SOCKS server failure")]
    GeneralFailure = 0x01,
    #[error("command not supported")]
    CommandNotSupported = 0x07,
    #[error("address type not supported")]
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

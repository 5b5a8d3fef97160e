/// METHOD values offered in a greeting. The proxy always answers with
/// [`AuthMethod::NoAuthRequired`]; the others only show up in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuthRequired,
    Gssapi,
    UsernamePassword,
    Other(u8),
}

impl From<u8> for AuthMethod {
    fn from(value: u8) -> Self {
        match value {
            0x00 => AuthMethod::NoAuthRequired,
            0x01 => AuthMethod::Gssapi,
            0x02 => AuthMethod::UsernamePassword,
            other => AuthMethod::Other(other),
        }
    }
}

impl AuthMethod {
    pub fn to_u8(self) -> u8 {
        match self {
            AuthMethod::NoAuthRequired => 0x00,
            AuthMethod::Gssapi => 0x01,
            AuthMethod::UsernamePassword => 0x02,
            AuthMethod::Other(value) => value,
        }
    }
}

//! SOCKS5 Protocol Types

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::constants::*;

/// Address carried in a connect request or reply.
///
/// Used for the final target, for proxy endpoints, and for the bound address a
/// proxy reports back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressSpec {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl AddressSpec {
    /// Build a domain address, rejecting names the wire format cannot carry.
    pub fn domain(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_domain(&name)?;
        Ok(AddressSpec::Domain(name))
    }

    /// Classify a textual host: IP literals (bracketed IPv6 included) become
    /// `Ipv4`/`Ipv6`, anything else is a domain name.
    pub fn from_host(host: &str) -> Result<Self> {
        if let Some(bracketed) = host.strip_prefix('[') {
            return bracketed
                .strip_suffix(']')
                .and_then(|inner| inner.parse::<Ipv6Addr>().ok())
                .map(AddressSpec::Ipv6)
                .ok_or_else(|| {
                    Error::Validation(format!("brackets only enclose IPv6 literals: {}", host))
                });
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(AddressSpec::from(ip)),
            Err(_) => AddressSpec::domain(host),
        }
    }

    /// Get the address type code for this address
    pub fn address_type(&self) -> u8 {
        match self {
            AddressSpec::Ipv4(_) => SOCKS5_ADDR_IPV4,
            AddressSpec::Ipv6(_) => SOCKS5_ADDR_IPV6,
            AddressSpec::Domain(_) => SOCKS5_ADDR_DOMAIN,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            AddressSpec::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            AddressSpec::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            AddressSpec::Domain(_) => None,
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, AddressSpec::Domain(_))
    }

    /// Number of bytes this address occupies on the wire, excluding ATYP and port.
    pub fn encoded_len(&self) -> usize {
        match self {
            AddressSpec::Ipv4(_) => 4,
            AddressSpec::Ipv6(_) => 16,
            AddressSpec::Domain(name) => 1 + name.len(),
        }
    }
}

pub(crate) fn validate_domain(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("domain name cannot be empty".into()));
    }
    if name.len() > MAX_FIELD_LEN {
        return Err(Error::Validation(format!(
            "domain name too long: {} bytes (max {})",
            name.len(),
            MAX_FIELD_LEN
        )));
    }
    Ok(())
}

impl From<IpAddr> for AddressSpec {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => AddressSpec::Ipv4(v4),
            IpAddr::V6(v6) => AddressSpec::Ipv6(v6),
        }
    }
}

impl From<&SocketAddr> for AddressSpec {
    fn from(addr: &SocketAddr) -> Self {
        AddressSpec::from(addr.ip())
    }
}

impl FromStr for AddressSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AddressSpec::from_host(s)
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Ipv4(ip) => write!(f, "{}", ip),
            AddressSpec::Ipv6(ip) => write!(f, "[{}]", ip),
            AddressSpec::Domain(name) => f.write_str(name),
        }
    }
}

/// SOCKS5 command. Only `Connect` is ever issued by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Connect,
    Bind,
    UdpAssociate,
}

impl ConnectionType {
    pub fn code(self) -> u8 {
        match self {
            ConnectionType::Connect => SOCKS5_CMD_CONNECT,
            ConnectionType::Bind => SOCKS5_CMD_BIND,
            ConnectionType::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_CMD_CONNECT => Some(ConnectionType::Connect),
            SOCKS5_CMD_BIND => Some(ConnectionType::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(ConnectionType::UdpAssociate),
            _ => None,
        }
    }
}

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    UsernamePassword,
    NoAcceptable,
}

impl AuthMethod {
    /// Convert to method code
    pub fn code(self) -> u8 {
        match self {
            AuthMethod::NoAuth => SOCKS5_AUTH_NONE,
            AuthMethod::UsernamePassword => SOCKS5_AUTH_USERPASS,
            AuthMethod::NoAcceptable => SOCKS5_AUTH_NO_ACCEPTABLE,
        }
    }

    /// Create from method code. GSSAPI and private methods are not recognized.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SOCKS5_AUTH_NONE => Some(AuthMethod::NoAuth),
            SOCKS5_AUTH_USERPASS => Some(AuthMethod::UsernamePassword),
            SOCKS5_AUTH_NO_ACCEPTABLE => Some(AuthMethod::NoAcceptable),
            _ => None,
        }
    }
}

/// Outcome byte of a connect reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded,
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unassigned(u8),
}

impl ReplyCode {
    pub fn code(self) -> u8 {
        match self {
            ReplyCode::Succeeded => SOCKS5_REPLY_SUCCESS,
            ReplyCode::GeneralFailure => SOCKS5_REPLY_GENERAL_FAILURE,
            ReplyCode::NotAllowed => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
            ReplyCode::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
            ReplyCode::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
            ReplyCode::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
            ReplyCode::TtlExpired => SOCKS5_REPLY_TTL_EXPIRED,
            ReplyCode::CommandNotSupported => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            ReplyCode::AddressTypeNotSupported => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            ReplyCode::Unassigned(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            SOCKS5_REPLY_SUCCESS => ReplyCode::Succeeded,
            SOCKS5_REPLY_GENERAL_FAILURE => ReplyCode::GeneralFailure,
            SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => ReplyCode::NotAllowed,
            SOCKS5_REPLY_NETWORK_UNREACHABLE => ReplyCode::NetworkUnreachable,
            SOCKS5_REPLY_HOST_UNREACHABLE => ReplyCode::HostUnreachable,
            SOCKS5_REPLY_CONNECTION_REFUSED => ReplyCode::ConnectionRefused,
            SOCKS5_REPLY_TTL_EXPIRED => ReplyCode::TtlExpired,
            SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => ReplyCode::CommandNotSupported,
            SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => ReplyCode::AddressTypeNotSupported,
            other => ReplyCode::Unassigned(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == ReplyCode::Succeeded
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplyCode::Succeeded => "succeeded",
            ReplyCode::GeneralFailure => "general SOCKS server failure",
            ReplyCode::NotAllowed => "connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddressTypeNotSupported => "address type not supported",
            ReplyCode::Unassigned(code) => return write!(f, "unassigned reply code {:#04x}", code),
        };
        f.write_str(text)
    }
}

/// Decoded connect reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReply {
    pub code: ReplyCode,
    pub bound_address: AddressSpec,
    pub bound_port: u16,
}

/// Decoded connect request. Only produced by [`decode_connect_request`](super::codec::decode_connect_request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub command: ConnectionType,
    pub target: AddressSpec,
    pub port: u16,
}

/// Username/password pair for RFC 1929 sub-negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields must be 1 to 255 bytes, as RFC 1929 requires.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::Validation("username cannot be empty".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Validation("password cannot be empty".into()));
        }
        if self.username.len() > MAX_FIELD_LEN {
            return Err(Error::Validation(format!(
                "username too long: {} bytes (max {})",
                self.username.len(),
                MAX_FIELD_LEN
            )));
        }
        if self.password.len() > MAX_FIELD_LEN {
            return Err(Error::Validation(format!(
                "password too long: {} bytes (max {})",
                self.password.len(),
                MAX_FIELD_LEN
            )));
        }
        Ok(())
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_host_classifies_literals() {
        assert_eq!(
            AddressSpec::from_host("10.1.2.3").unwrap(),
            AddressSpec::Ipv4(Ipv4Addr::new(10, 1, 2, 3))
        );
        assert_eq!(
            AddressSpec::from_host("[::1]").unwrap(),
            AddressSpec::Ipv6(Ipv6Addr::LOCALHOST)
        );
        assert_eq!(
            AddressSpec::from_host("::1").unwrap(),
            AddressSpec::Ipv6(Ipv6Addr::LOCALHOST)
        );
        assert_eq!(
            AddressSpec::from_host("example.com").unwrap(),
            AddressSpec::Domain("example.com".to_string())
        );
    }

    #[test]
    fn test_from_host_rejects_bracketed_names() {
        assert!(matches!(
            AddressSpec::from_host("[example.com]"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            AddressSpec::from_host("[10.0.0.1]"),
            Err(Error::Validation(_))
        ));
        assert!(AddressSpec::from_host("[::1").is_err());
    }

    #[test]
    fn test_credentials_reject_empty_fields() {
        assert!(Credentials::new("alice", "pw").validate().is_ok());
        assert!(matches!(Credentials::new("", "pw").validate(), Err(Error::Validation(_))));
        assert!(matches!(Credentials::new("alice", "").validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_domain_length_limit() {
        assert!(AddressSpec::domain("a".repeat(255)).is_ok());
        assert!(matches!(
            AddressSpec::domain("a".repeat(256)),
            Err(Error::Validation(_))
        ));
        assert!(AddressSpec::domain("").is_err());
    }

    #[test]
    fn test_reply_code_mapping() {
        for code in 0u8..=8 {
            assert_eq!(ReplyCode::from_code(code).code(), code);
        }
        assert_eq!(ReplyCode::from_code(0x04), ReplyCode::HostUnreachable);
        assert_eq!(ReplyCode::from_code(0x42), ReplyCode::Unassigned(0x42));
        assert!(ReplyCode::Succeeded.is_success());
        assert!(!ReplyCode::TtlExpired.is_success());
    }

    #[test]
    fn test_display_brackets_ipv6() {
        assert_eq!(AddressSpec::Ipv6(Ipv6Addr::LOCALHOST).to_string(), "[::1]");
        assert_eq!(AddressSpec::Ipv4(Ipv4Addr::LOCALHOST).to_string(), "127.0.0.1");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("alice", "s3cret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("s3cret"));
    }
}

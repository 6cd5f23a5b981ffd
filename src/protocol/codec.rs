//! SOCKS5 Message Codec
//!
//! Pure encode/decode functions for the client side of the handshake. Nothing
//! here touches a socket: decoders take whatever bytes have arrived so far and
//! either return the decoded value together with the number of bytes it used,
//! or report how many bytes are needed before decoding can finish.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    AddressSpec, AuthMethod, ConnectReply, ConnectRequest, ConnectionType, Credentials, ReplyCode,
};
use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::types::validate_domain;

/// Result of feeding a (possibly partial) buffer to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// The message is complete and occupied the first `consumed` bytes.
    Complete { value: T, consumed: usize },
    /// At least `needed` bytes in total are required to make progress.
    Incomplete { needed: usize },
}

impl<T> Decoded<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Decoded::Complete { value, consumed } => Decoded::Complete {
                value: f(value),
                consumed,
            },
            Decoded::Incomplete { needed } => Decoded::Incomplete { needed },
        }
    }

    pub fn complete(self) -> Option<(T, usize)> {
        match self {
            Decoded::Complete { value, consumed } => Some((value, consumed)),
            Decoded::Incomplete { .. } => None,
        }
    }
}

macro_rules! need {
    ($buf:expr, $len:expr) => {
        if $buf.len() < $len {
            return Ok(Decoded::Incomplete { needed: $len });
        }
    };
}

// +----+----------+----------+
// |VER | NMETHODS | METHODS  |
// +----+----------+----------+
// | 1  |    1     | 1 to 255 |
// +----+----------+----------+
pub fn encode_greeting(methods: &[AuthMethod]) -> Result<Bytes> {
    if methods.is_empty() {
        return Err(Error::Validation("greeting must offer at least one method".into()));
    }
    if methods.len() > MAX_FIELD_LEN {
        return Err(Error::Validation(format!(
            "too many authentication methods: {}",
            methods.len()
        )));
    }
    if methods.contains(&AuthMethod::NoAcceptable) {
        return Err(Error::Validation("NoAcceptable cannot be offered".into()));
    }

    let mut buf = BytesMut::with_capacity(2 + methods.len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(methods.len() as u8);
    for method in methods {
        buf.put_u8(method.code());
    }
    Ok(buf.freeze())
}

/// Decode a greeting into the raw method codes it offers.
pub fn decode_greeting(buf: &[u8]) -> Result<Decoded<Vec<u8>>> {
    need!(buf, 2);
    check_version(buf[0], "greeting")?;
    let n_methods = buf[1] as usize;
    if n_methods == 0 {
        return Err(Error::protocol("greeting offers no authentication methods"));
    }
    need!(buf, 2 + n_methods);
    Ok(Decoded::Complete {
        value: buf[2..2 + n_methods].to_vec(),
        consumed: 2 + n_methods,
    })
}

// +----+--------+
// |VER | METHOD |
// +----+--------+
pub fn decode_method_selection(buf: &[u8]) -> Result<Decoded<AuthMethod>> {
    need!(buf, METHOD_SELECTION_LEN);
    check_version(buf[0], "method selection")?;

    match AuthMethod::from_code(buf[1]) {
        Some(AuthMethod::NoAcceptable) => Err(Error::protocol(
            "proxy accepted none of the offered authentication methods",
        )),
        Some(method) => Ok(Decoded::Complete {
            value: method,
            consumed: METHOD_SELECTION_LEN,
        }),
        None => Err(Error::protocol(format!(
            "proxy selected unsupported authentication method {:#04x}",
            buf[1]
        ))),
    }
}

// +----+------+----------+------+----------+
// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
// +----+------+----------+------+----------+
// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
// +----+------+----------+------+----------+
pub fn encode_userpass(username: &str, password: &str) -> Result<Bytes> {
    let creds = Credentials::new(username, password);
    creds.validate()?;

    let mut buf = BytesMut::with_capacity(3 + username.len() + password.len());
    buf.put_u8(SOCKS5_USERPASS_VERSION);
    buf.put_u8(username.len() as u8);
    buf.put_slice(username.as_bytes());
    buf.put_u8(password.len() as u8);
    buf.put_slice(password.as_bytes());
    Ok(buf.freeze())
}

pub fn decode_userpass(buf: &[u8]) -> Result<Decoded<Credentials>> {
    need!(buf, 2);
    if buf[0] != SOCKS5_USERPASS_VERSION {
        return Err(Error::protocol(format!(
            "invalid username/password version: {:#04x}",
            buf[0]
        )));
    }
    let ulen = buf[1] as usize;
    need!(buf, 2 + ulen + 1);
    let plen = buf[2 + ulen] as usize;
    let total = 3 + ulen + plen;
    need!(buf, total);

    let username = utf8_field(&buf[2..2 + ulen], "username")?;
    let password = utf8_field(&buf[3 + ulen..total], "password")?;
    Ok(Decoded::Complete {
        value: Credentials::new(username, password),
        consumed: total,
    })
}

/// Decode the sub-negotiation status; `true` means the proxy accepted.
pub fn decode_userpass_reply(buf: &[u8]) -> Result<Decoded<bool>> {
    need!(buf, USERPASS_REPLY_LEN);
    if buf[0] != SOCKS5_USERPASS_VERSION {
        return Err(Error::protocol(format!(
            "invalid auth reply version: {:#04x}",
            buf[0]
        )));
    }
    Ok(Decoded::Complete {
        value: buf[1] == SOCKS5_USERPASS_SUCCESS,
        consumed: USERPASS_REPLY_LEN,
    })
}

// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+
pub fn encode_connect_request(
    command: ConnectionType,
    target: &AddressSpec,
    port: u16,
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + target.encoded_len() + 2);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(command.code());
    buf.put_u8(SOCKS5_RESERVED);
    buf.put_u8(target.address_type());

    match target {
        AddressSpec::Ipv4(ip) => buf.put_slice(&ip.octets()),
        AddressSpec::Ipv6(ip) => buf.put_slice(&ip.octets()),
        AddressSpec::Domain(name) => {
            validate_domain(name)?;
            buf.put_u8(name.len() as u8);
            buf.put_slice(name.as_bytes());
        }
    }

    buf.put_u16(port);
    Ok(buf.freeze())
}

pub fn decode_connect_request(buf: &[u8]) -> Result<Decoded<ConnectRequest>> {
    need!(buf, REQUEST_HEADER_LEN);
    check_version(buf[0], "connect request")?;
    let command = ConnectionType::from_code(buf[1])
        .ok_or_else(|| Error::protocol(format!("unknown command {:#04x}", buf[1])))?;

    Ok(decode_addr_port(buf, buf[3], "destination")?.map(|(target, port)| ConnectRequest {
        command,
        target,
        port,
    }))
}

// +----+-----+-------+------+----------+----------+
// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+
pub fn decode_connect_reply(buf: &[u8]) -> Result<Decoded<ConnectReply>> {
    need!(buf, REQUEST_HEADER_LEN);
    check_version(buf[0], "connect reply")?;
    let code = ReplyCode::from_code(buf[1]);

    Ok(decode_addr_port(buf, buf[3], "bind")?.map(|(bound_address, bound_port)| ConnectReply {
        code,
        bound_address,
        bound_port,
    }))
}

fn check_version(version: u8, what: &str) -> Result<()> {
    if version != SOCKS5_VERSION {
        return Err(Error::protocol(format!(
            "invalid SOCKS version in {}: {:#04x}",
            what, version
        )));
    }
    Ok(())
}

fn utf8_field(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::protocol(format!("invalid UTF-8 in {}: {}", what, e)))
}

/// Decode ATYP-dependent address plus port, starting right after the 4-byte header.
fn decode_addr_port(buf: &[u8], atyp: u8, what: &str) -> Result<Decoded<(AddressSpec, u16)>> {
    let start = REQUEST_HEADER_LEN;

    let (address, addr_end) = match atyp {
        SOCKS5_ADDR_IPV4 => {
            let end = start + 4;
            need!(buf, end + 2);
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[start..end]);
            (AddressSpec::Ipv4(Ipv4Addr::from(octets)), end)
        }
        SOCKS5_ADDR_IPV6 => {
            let end = start + 16;
            need!(buf, end + 2);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[start..end]);
            (AddressSpec::Ipv6(Ipv6Addr::from(octets)), end)
        }
        SOCKS5_ADDR_DOMAIN => {
            need!(buf, start + 1);
            let len = buf[start] as usize;
            if len == 0 {
                return Err(Error::protocol(format!("{} domain length cannot be zero", what)));
            }
            let end = start + 1 + len;
            need!(buf, end + 2);
            let name = utf8_field(&buf[start + 1..end], "domain name")?;
            (AddressSpec::Domain(name), end)
        }
        other => {
            return Err(Error::protocol(format!(
                "unsupported {} address type: {:#04x}",
                what, other
            )))
        }
    };

    let mut port_bytes = &buf[addr_end..addr_end + 2];
    let port = port_bytes.get_u16();
    Ok(Decoded::Complete {
        value: (address, port),
        consumed: addr_end + 2,
    })
}

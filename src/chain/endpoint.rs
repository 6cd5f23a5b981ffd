//! Proxy Endpoints

use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::types::validate_domain;
use crate::protocol::{AddressSpec, AuthMethod, Credentials, DEFAULT_PROXY_PORT};

const OFFER_NO_AUTH: &[AuthMethod] = &[AuthMethod::NoAuth];
const OFFER_WITH_CREDENTIALS: &[AuthMethod] = &[AuthMethod::NoAuth, AuthMethod::UsernamePassword];

/// One hop of a proxy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub address: AddressSpec,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl ProxyEndpoint {
    pub fn new(address: AddressSpec, port: u16) -> Self {
        Self {
            address,
            port,
            credentials: None,
        }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(AddressSpec::from(&addr), addr.port())
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Methods to put in the greeting for this hop.
    pub fn offered_methods(&self) -> &'static [AuthMethod] {
        if self.credentials.is_some() {
            OFFER_WITH_CREDENTIALS
        } else {
            OFFER_NO_AUTH
        }
    }

    /// Check that every field fits the wire format.
    pub fn validate(&self) -> Result<()> {
        if let AddressSpec::Domain(name) = &self.address {
            validate_domain(name)?;
        }
        if let Some(credentials) = &self.credentials {
            credentials.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<ProxyUrl>().map(|url| url.endpoint)
    }
}

/// URL scheme of a proxy entry. `socks5h` asks the proxy to resolve names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Socks5,
    Socks5h,
}

/// Parsed `socks5://[user:pass@]host[:port]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    pub scheme: ProxyScheme,
    pub endpoint: ProxyEndpoint,
}

impl ProxyUrl {
    pub fn remote_dns(&self) -> bool {
        self.scheme == ProxyScheme::Socks5h
    }
}

impl FromStr for ProxyUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (parse_scheme(scheme)?, rest),
            None => (ProxyScheme::Socks5, s),
        };
        let rest = rest.trim_end_matches('/');

        let (userinfo, hostport) = match rest.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, rest),
        };

        let (host, port) = split_host_port(hostport)?;
        let mut endpoint = ProxyEndpoint::new(AddressSpec::from_host(host)?, port);

        if let Some(userinfo) = userinfo {
            let (username, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
            endpoint.credentials = Some(Credentials::new(
                percent_decode(username)?,
                percent_decode(password)?,
            ));
        }

        endpoint.validate()?;
        Ok(ProxyUrl { scheme, endpoint })
    }
}

fn parse_scheme(scheme: &str) -> Result<ProxyScheme> {
    match scheme.to_ascii_lowercase().as_str() {
        "socks5" => Ok(ProxyScheme::Socks5),
        "socks5h" => Ok(ProxyScheme::Socks5h),
        other => Err(Error::config(format!("unsupported proxy scheme: {}", other))),
    }
}

fn split_host_port(hostport: &str) -> Result<(&str, u16)> {
    if hostport.is_empty() {
        return Err(Error::config("proxy URL has no host"));
    }

    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::config("unterminated IPv6 literal in proxy URL"))?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(Error::config(format!("brackets only enclose IPv6 literals: [{}]", host)));
        }
        match after {
            "" => (host, None),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(Error::config("unexpected characters after IPv6 literal")),
            },
        }
    } else {
        match hostport.matches(':').count() {
            0 => (hostport, None),
            1 => match hostport.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            },
            _ => return Err(Error::config("IPv6 proxy addresses must be bracketed")),
        }
    };

    let port = match port {
        Some(text) => text
            .parse::<u16>()
            .map_err(|_| Error::config(format!("invalid proxy port: {}", text)))?,
        None => DEFAULT_PROXY_PORT,
    };
    Ok((host, port))
}

fn percent_decode(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| Error::config("proxy credentials are not valid UTF-8"))
}

//! Transport Layer
//!
//! The raw stream the first hop is dialed over, and the tunnel handed back once
//! every hop has agreed to forward.

pub mod tunnel;

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::AddressSpec;

pub use tunnel::TunnelHandle;

/// Knows how to open a byte stream to the first hop of a chain.
///
/// Implementations only dial; closing is `shutdown` followed by drop.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The stream type this connector produces.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a stream to `host:port`. `host` is a domain only when the proxy
    /// hostname could not (or should not) be resolved beforehand.
    async fn connect(&self, host: &AddressSpec, port: u16) -> io::Result<Self::Stream>;
}

/// Plain TCP via tokio.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    pub nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self { nodelay: true }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &AddressSpec, port: u16) -> io::Result<TcpStream> {
        let stream = match host {
            AddressSpec::Domain(name) => TcpStream::connect((name.as_str(), port)).await?,
            other => {
                // as_ip is always Some for the literal variants
                let ip = other
                    .as_ip()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an IP literal"))?;
                TcpStream::connect(SocketAddr::new(ip, port)).await?
            }
        };

        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        debug!(peer = ?stream.peer_addr().ok(), "Opened TCP transport");
        Ok(stream)
    }
}

/// Gracefully close a transport, ignoring errors from an already-dead peer.
pub(crate) async fn close<S>(mut stream: S)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        debug!("Transport shutdown failed: {}", e);
    }
}

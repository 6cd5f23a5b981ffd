//! Tunnel Handle

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::protocol::AddressSpec;

/// End-to-end stream produced by a successful chain.
///
/// Owns the transport exclusively and forwards reads and writes to it untouched;
/// no handshake state survives in here.
#[derive(Debug)]
pub struct TunnelHandle<S> {
    stream: S,
    bound_address: AddressSpec,
    bound_port: u16,
    hops: usize,
}

impl<S> TunnelHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: S, bound_address: AddressSpec, bound_port: u16, hops: usize) -> Self {
        Self {
            stream,
            bound_address,
            bound_port,
            hops,
        }
    }

    /// Address and port the last hop reported for its outbound connection.
    pub fn bound_addr(&self) -> (&AddressSpec, u16) {
        (&self.bound_address, self.bound_port)
    }

    /// Number of proxies the tunnel passes through.
    pub fn hops(&self) -> usize {
        self.hops
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Give up the wrapper, e.g. to hand the raw stream to a TLS connector.
    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

impl<S> AsyncRead for TunnelHandle<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for TunnelHandle<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

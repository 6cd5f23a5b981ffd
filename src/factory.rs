//! Connection Factory
//!
//! Glue point for HTTP clients and other consumers that want "give me a stream
//! to host:port" without knowing about proxies. The factory is a plain function
//! value; nothing here depends on any HTTP type.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::chain::{ChainConnector, ProxyChain, Resolver};
use crate::error::{Error, Result};
use crate::protocol::AddressSpec;
use crate::transport::{Connector, TunnelHandle};

/// Scheme of the request the tunnel is for. The tunnel itself is scheme-agnostic;
/// TLS for `Https` is layered on by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::config(format!("unsupported scheme: {}", other))),
        }
    }
}

/// `(target_host, target_port, scheme) -> TunnelHandle`, as injected into an
/// integration layer.
pub type ConnectFn<S> =
    Arc<dyn Fn(String, u16, Scheme) -> BoxFuture<'static, Result<TunnelHandle<S>>> + Send + Sync>;

/// Opens tunnels through a fixed chain for arbitrary targets.
pub struct TunnelFactory<C, R> {
    connector: Arc<ChainConnector<C, R>>,
    chain: Arc<ProxyChain>,
}

impl<C, R> Clone for TunnelFactory<C, R> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<C, R> TunnelFactory<C, R>
where
    C: Connector + 'static,
    R: Resolver + 'static,
{
    pub fn new(connector: ChainConnector<C, R>, chain: ProxyChain) -> Self {
        Self {
            connector: Arc::new(connector),
            chain: Arc::new(chain),
        }
    }

    pub fn chain(&self) -> &ProxyChain {
        &self.chain
    }

    /// Open a tunnel to `host:port`. A port of 0 means the scheme's default.
    pub async fn connect(&self, host: &str, port: u16, scheme: Scheme) -> Result<TunnelHandle<C::Stream>> {
        let port = if port == 0 { scheme.default_port() } else { port };
        let target = AddressSpec::from_host(host)?;
        debug!(%scheme, host, port, "Factory opening tunnel");

        self.connector
            .connect(&self.chain.proxies, &target, port, &self.chain.options)
            .await
    }

    /// Turn the factory into a boxed function value.
    pub fn into_fn(self) -> ConnectFn<C::Stream> {
        Arc::new(move |host: String, port: u16, scheme: Scheme| {
            let factory = self.clone();
            async move { factory.connect(&host, port, scheme).await }.boxed()
        })
    }
}

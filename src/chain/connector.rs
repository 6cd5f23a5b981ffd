//! Proxy Chain Connector
//!
//! Builds a tunnel through an ordered list of SOCKS5 proxies. Only the first hop
//! is dialed directly; every later hop is reached by asking the previous one to
//! CONNECT to it, and the last hop is asked to CONNECT to the target.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::resolve::{ResolutionPolicy, Resolver, SystemResolver};
use super::{ProxyEndpoint, ProxyUrl};
use crate::error::{Error, Phase, Result};
use crate::protocol::{AddressSpec, AuthMethod, ConnectReply, Credentials, HandshakeSession};
use crate::transport::{self, Connector, TcpConnector, TunnelHandle};

/// Default bound on opening the transport to the first hop.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable knobs for a chain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOptions {
    pub resolution: ResolutionPolicy,
    /// Timeout for opening the first hop's transport
    pub connect_timeout: Duration,
    /// Optional bound on the whole attempt, resolution included
    pub handshake_timeout: Option<Duration>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            resolution: ResolutionPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: None,
        }
    }
}

impl ChainOptions {
    pub fn with_remote_dns(mut self, remote: bool) -> Self {
        self.resolution.remote_target_resolution = remote;
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionPolicy) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Hop and phase the attempt is currently in, for error attribution.
#[derive(Debug, Clone, Copy)]
struct Progress {
    hop: usize,
    phase: Phase,
}

/// Runs chain attempts over a transport connector and a resolver.
///
/// Holds no per-attempt state, so one connector can serve any number of
/// concurrent attempts.
#[derive(Debug, Clone, Default)]
pub struct ChainConnector<C = TcpConnector, R = SystemResolver> {
    connector: C,
    resolver: R,
}

impl ChainConnector {
    /// Connector using plain TCP and the system resolver.
    pub fn new() -> Self {
        Self::with_collaborators(TcpConnector::new(), SystemResolver)
    }
}

impl<C, R> ChainConnector<C, R>
where
    C: Connector,
    R: Resolver,
{
    pub fn with_collaborators(connector: C, resolver: R) -> Self {
        Self { connector, resolver }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Connect through `chain` to `target:port`.
    pub async fn connect(
        &self,
        chain: &[ProxyEndpoint],
        target: &AddressSpec,
        port: u16,
        options: &ChainOptions,
    ) -> Result<TunnelHandle<C::Stream>> {
        self.connect_with_cancel(chain, target, port, options, &CancellationToken::new())
            .await
    }

    /// Same as [`connect`](Self::connect) but the last hop resolves the target.
    pub async fn connect_remote_dns(
        &self,
        chain: &[ProxyEndpoint],
        target: &AddressSpec,
        port: u16,
        options: &ChainOptions,
    ) -> Result<TunnelHandle<C::Stream>> {
        let options = options.clone().with_remote_dns(true);
        self.connect(chain, target, port, &options).await
    }

    /// Connect, giving up as soon as `cancel` fires.
    ///
    /// Any transport already open is shut down before `Error::Cancelled` is returned.
    pub async fn connect_with_cancel(
        &self,
        chain: &[ProxyEndpoint],
        target: &AddressSpec,
        port: u16,
        options: &ChainOptions,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle<C::Stream>> {
        let span = info_span!(
            "chain_connect",
            attempt = %Uuid::new_v4(),
            hops = chain.len(),
            dest = %target,
            port
        );
        self.attempt(chain, target, port, options, cancel)
            .instrument(span)
            .await
    }

    async fn attempt(
        &self,
        chain: &[ProxyEndpoint],
        target: &AddressSpec,
        port: u16,
        options: &ChainOptions,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle<C::Stream>> {
        if chain.is_empty() {
            return Err(Error::config("proxy chain is empty"));
        }
        for (i, proxy) in chain.iter().enumerate() {
            proxy.validate().map_err(|e| match e {
                Error::Validation(msg) => Error::Validation(format!("proxy {}: {}", i + 1, msg)),
                other => other,
            })?;
        }

        let hops = chain.len();
        let deadline = options
            .handshake_timeout
            .map(|limit| (Instant::now() + limit, limit));
        debug!("Connecting through proxy chain with {} proxies", hops);

        let resolution = async {
            let proxies = options.resolution.resolve_chain(&self.resolver, chain).await;
            let final_target = options
                .resolution
                .resolve_target(&self.resolver, target)
                .await
                .map_err(|e| e.at_hop(hops, Phase::Resolution))?;
            Ok::<_, Error>((proxies, final_target))
        };
        // Resolution failures of any kind are attributed to the last hop
        let (proxies, final_target) = tokio::select! {
            biased;
            stop = interrupted(cancel, deadline) => return Err(stop.at_hop(hops, Phase::Resolution)),
            resolved = resolution => resolved?,
        };

        // Connect to the first proxy directly
        let first = &proxies[0];
        debug!(proxy = %first, "Connecting to first proxy");
        let open = timeout(
            options.connect_timeout,
            self.connector.connect(&first.address, first.port),
        );
        let mut stream = tokio::select! {
            biased;
            stop = interrupted(cancel, deadline) => return Err(stop.at_hop(1, Phase::Connect)),
            opened = open => match opened {
                Err(_) => {
                    return Err(Error::Timeout(options.connect_timeout).at_hop(1, Phase::Connect))
                }
                Ok(Err(e)) => return Err(Error::Connect(e).at_hop(1, Phase::Connect)),
                Ok(Ok(stream)) => stream,
            },
        };
        debug!(proxy = %first, "Connected to first proxy");

        let mut progress = Progress {
            hop: 1,
            phase: Phase::Negotiate,
        };
        let outcome = {
            let handshakes = handshake_chain(&mut stream, &proxies, &final_target, port, &mut progress);
            tokio::select! {
                biased;
                stop = interrupted(cancel, deadline) => Err(stop),
                done = handshakes => done,
            }
        };

        match outcome {
            Ok(reply) => {
                info!(
                    hops,
                    bound = %reply.bound_address,
                    bound_port = reply.bound_port,
                    "Tunnel established"
                );
                Ok(TunnelHandle::new(
                    stream,
                    reply.bound_address,
                    reply.bound_port,
                    hops,
                ))
            }
            Err(e) => {
                let e = e.at_hop(progress.hop, progress.phase);
                debug!("Closing transport after failed chain attempt: {}", e);
                transport::close(stream).await;
                Err(e)
            }
        }
    }
}

/// Resolves once the attempt must stop, with the reason.
async fn interrupted(cancel: &CancellationToken, deadline: Option<(Instant, Duration)>) -> Error {
    match deadline {
        Some((at, limit)) => tokio::select! {
            _ = cancel.cancelled() => Error::Cancelled,
            _ = tokio::time::sleep_until(at) => Error::Timeout(limit),
        },
        None => {
            cancel.cancelled().await;
            Error::Cancelled
        }
    }
}

/// Handshake every hop in order over the one stream.
async fn handshake_chain<S>(
    stream: &mut S,
    proxies: &[ProxyEndpoint],
    target: &AddressSpec,
    port: u16,
    progress: &mut Progress,
) -> Result<ConnectReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut last_reply = None;

    for (i, proxy) in proxies.iter().enumerate() {
        // Each hop is asked for the next hop, the last one for the target
        let (next_address, next_port) = match proxies.get(i + 1) {
            Some(next) => (&next.address, next.port),
            None => (target, port),
        };

        progress.hop = i + 1;
        debug!(
            "Chaining through proxy {} of {}: {} -> {}:{}",
            i + 1,
            proxies.len(),
            proxy,
            next_address,
            next_port
        );
        last_reply = Some(handshake_hop(stream, proxy, next_address, next_port, progress).await?);
    }

    last_reply.ok_or_else(|| Error::config("proxy chain is empty"))
}

async fn handshake_hop<S>(
    stream: &mut S,
    proxy: &ProxyEndpoint,
    next_address: &AddressSpec,
    next_port: u16,
    progress: &mut Progress,
) -> Result<ConnectReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = HandshakeSession::new(stream);

    progress.phase = Phase::Negotiate;
    let method = session.negotiate(proxy.offered_methods()).await?;

    if method == AuthMethod::UsernamePassword {
        progress.phase = Phase::Auth;
        let credentials = proxy
            .credentials
            .as_ref()
            .ok_or_else(|| Error::protocol("proxy demanded credentials that were not configured"))?;
        session.authenticate(credentials).await?;
    }

    progress.phase = Phase::Request;
    session.request_connect(next_address, next_port).await
}

/// An ordered chain of proxies together with the options to run it with.
#[derive(Debug, Clone)]
pub struct ProxyChain {
    /// List of proxies in the chain (first proxy is connected to directly)
    pub proxies: Vec<ProxyEndpoint>,
    pub options: ChainOptions,
}

impl ProxyChain {
    /// Connect to `host:port`; `host` may be an IP literal or a name.
    pub async fn connect<C, R>(
        &self,
        connector: &ChainConnector<C, R>,
        host: &str,
        port: u16,
    ) -> Result<TunnelHandle<C::Stream>>
    where
        C: Connector,
        R: Resolver,
    {
        let target = AddressSpec::from_host(host)?;
        connector.connect(&self.proxies, &target, port, &self.options).await
    }
}

/// Proxy chain builder for easier configuration
pub struct ProxyChainBuilder {
    proxies: Vec<ProxyEndpoint>,
    options: ChainOptions,
    last_url_remote_dns: bool,
}

impl ProxyChainBuilder {
    pub fn new() -> Self {
        Self {
            proxies: Vec::new(),
            options: ChainOptions::default(),
            last_url_remote_dns: false,
        }
    }

    pub fn add_proxy(mut self, proxy: ProxyEndpoint) -> Self {
        self.proxies.push(proxy);
        self.last_url_remote_dns = false;
        self
    }

    /// Add a SOCKS5 proxy to the chain
    pub fn add_socks5_proxy(self, addr: SocketAddr, auth: Option<Credentials>) -> Self {
        let mut proxy = ProxyEndpoint::from_socket_addr(addr);
        proxy.credentials = auth;
        self.add_proxy(proxy)
    }

    /// Add a proxy from a `socks5://` or `socks5h://` URL. A `socks5h` entry in
    /// the last position turns on remote target resolution.
    pub fn add_proxy_url(mut self, url: &str) -> Result<Self> {
        let url: ProxyUrl = url.parse()?;
        let remote = url.remote_dns();
        self = self.add_proxy(url.endpoint);
        self.last_url_remote_dns = remote;
        Ok(self)
    }

    /// Set the timeout for opening the first hop
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = Some(timeout);
        self
    }

    pub fn remote_dns(mut self, remote: bool) -> Self {
        self.options.resolution.remote_target_resolution = remote;
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionPolicy) -> Self {
        self.options.resolution = resolution;
        self
    }

    /// Build the proxy chain
    pub fn build(mut self) -> Result<ProxyChain> {
        if self.proxies.is_empty() {
            return Err(Error::config("Proxy chain cannot be empty"));
        }
        for proxy in &self.proxies {
            proxy.validate()?;
        }
        if self.last_url_remote_dns {
            self.options.resolution.remote_target_resolution = true;
        }

        Ok(ProxyChain {
            proxies: self.proxies,
            options: self.options,
        })
    }
}

impl Default for ProxyChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

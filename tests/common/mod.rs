//! Scripted SOCKS5 proxies over in-memory streams

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use sockschain::chain::Resolver;
use sockschain::protocol::codec::{self, Decoded};
use sockschain::{AddressSpec, Connector};

/// What happened on the mock network, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connector dialed this node directly.
    Dialed(String),
    /// A proxy received a connect request.
    Request {
        by: String,
        target: AddressSpec,
        port: u16,
    },
    /// The node saw its client go away.
    Closed(String),
}

/// How a scripted proxy behaves.
#[derive(Debug, Clone, Default)]
pub struct MockProxy {
    /// Require these credentials and only accept username/password.
    pub credentials: Option<(String, String)>,
    /// Answer the greeting with this method code regardless of the offer.
    pub force_method: Option<u8>,
    /// Reply code for every connect request.
    pub reply: u8,
    /// Never answer the greeting.
    pub stall: bool,
}

impl MockProxy {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_auth(username: &str, password: &str) -> Self {
        Self {
            credentials: Some((username.to_string(), password.to_string())),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Proxy(MockProxy),
    /// Final target that echoes everything back.
    Echo,
}

struct Inner {
    nodes: HashMap<(AddressSpec, u16), (String, Node)>,
    events: Vec<Event>,
}

/// In-memory network of proxies and targets. Doubles as the transport
/// connector handed to the chain.
#[derive(Clone)]
pub struct MockNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                nodes: HashMap::new(),
                events: Vec::new(),
            })),
        }
    }

    pub fn add(&self, label: &str, address: AddressSpec, port: u16, node: Node) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert((address, port), (label.to_string(), node));
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn requests_by(&self, label: &str) -> Vec<(AddressSpec, u16)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Request { by, target, port } if by == label => Some((target, port)),
                _ => None,
            })
            .collect()
    }

    pub fn touched(&self, label: &str) -> bool {
        self.events().iter().any(|event| match event {
            Event::Dialed(l) | Event::Closed(l) => l == label,
            Event::Request { by, .. } => by == label,
        })
    }

    /// Wait until `label` has seen its client disconnect.
    pub async fn wait_closed(&self, label: &str) -> bool {
        let expected = Event::Closed(label.to_string());
        tokio::time::timeout(Duration::from_secs(2), async {
            while !self.events().contains(&expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    fn record(&self, event: Event) {
        self.inner.lock().unwrap().events.push(event);
    }

    fn lookup(&self, address: &AddressSpec, port: u16) -> Option<(String, Node)> {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get(&(address.clone(), port))
            .cloned()
    }

    fn serve(self, stream: DuplexStream, label: String, node: Node) -> BoxFuture<'static, ()> {
        async move {
            match node {
                Node::Echo => self.echo(stream, label).await,
                Node::Proxy(proxy) => self.proxy(stream, label, proxy).await,
            }
        }
        .boxed()
    }

    async fn echo(self, mut stream: DuplexStream, label: String) {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        self.record(Event::Closed(label));
    }

    async fn proxy(self, mut stream: DuplexStream, label: String, proxy: MockProxy) {
        let outcome = self.handshake(&mut stream, &label, &proxy).await;
        match outcome {
            Some((next_label, next)) => self.serve(stream, next_label, next).await,
            None => {
                drain(&mut stream).await;
                self.record(Event::Closed(label));
            }
        }
    }

    /// Run the server side of one handshake. Returns the node the client is
    /// now talking to, or `None` if the handshake ended here.
    async fn handshake(
        &self,
        stream: &mut DuplexStream,
        label: &str,
        proxy: &MockProxy,
    ) -> Option<(String, Node)> {
        let offered = read_message(stream, codec::decode_greeting).await?;
        if proxy.stall {
            return None;
        }

        let method = match (proxy.force_method, &proxy.credentials) {
            (Some(code), _) => code,
            (None, Some(_)) if offered.contains(&0x02) => 0x02,
            (None, Some(_)) => 0xFF,
            (None, None) => 0x00,
        };
        stream.write_all(&[0x05, method]).await.ok()?;
        if method == 0xFF {
            return None;
        }

        if method == 0x02 {
            let presented = read_message(stream, codec::decode_userpass).await?;
            let accepted = proxy
                .credentials
                .as_ref()
                .map(|(u, p)| *u == presented.username && *p == presented.password)
                .unwrap_or(false);
            stream
                .write_all(&[0x01, if accepted { 0x00 } else { 0x01 }])
                .await
                .ok()?;
            if !accepted {
                return None;
            }
        }

        let request = read_message(stream, codec::decode_connect_request).await?;
        self.record(Event::Request {
            by: label.to_string(),
            target: request.target.clone(),
            port: request.port,
        });

        let next = self.lookup(&request.target, request.port);
        let code = match (&next, proxy.reply) {
            (_, code) if code != 0 => code,
            (None, _) => 0x04,
            (Some(_), _) => 0x00,
        };
        stream
            .write_all(&[0x05, code, 0x00, 0x01, 10, 0, 0, 99, 0x1F, 0x90])
            .await
            .ok()?;

        if code == 0 {
            next
        } else {
            None
        }
    }
}

#[async_trait]
impl Connector for MockNetwork {
    type Stream = DuplexStream;

    async fn connect(&self, host: &AddressSpec, port: u16) -> io::Result<DuplexStream> {
        let (label, node) = self
            .lookup(host, port)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "nothing listening"))?;
        self.record(Event::Dialed(label.clone()));

        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(self.clone().serve(server, label, node));
        Ok(client)
    }
}

/// Read one message using the crate's own decoder, byte-exact.
async fn read_message<T>(
    stream: &mut DuplexStream,
    decode: fn(&[u8]) -> sockschain::Result<Decoded<T>>,
) -> Option<T> {
    let mut buf = Vec::new();
    loop {
        match decode(&buf).ok()? {
            Decoded::Complete { value, .. } => return Some(value),
            Decoded::Incomplete { needed } => {
                let have = buf.len();
                buf.resize(needed, 0);
                stream.read_exact(&mut buf[have..]).await.ok()?;
            }
        }
    }
}

/// Swallow whatever the client still sends until it hangs up.
async fn drain(stream: &mut DuplexStream) {
    let mut buf = [0u8; 256];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

/// Resolver answering from a fixed table.
#[derive(Default)]
pub struct StaticResolver {
    pub hosts: HashMap<String, IpAddr>,
}

impl StaticResolver {
    pub fn with(mut self, host: &str, ip: IpAddr) -> Self {
        self.hosts.insert(host.to_string(), ip);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        self.hosts
            .get(host)
            .map(|ip| vec![*ip])
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host)))
    }
}

/// Connector whose dials never complete.
pub struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _host: &AddressSpec, _port: u16) -> io::Result<DuplexStream> {
        std::future::pending().await
    }
}

/// Resolver whose lookups never complete.
pub struct StalledResolver;

#[async_trait]
impl Resolver for StalledResolver {
    async fn resolve(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
        std::future::pending().await
    }
}

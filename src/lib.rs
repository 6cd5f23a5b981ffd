//! sockschain Library
//!
//! Client-side SOCKS5 proxy chaining
//!
//! Opens a TCP tunnel to a target through an ordered list of SOCKS5 proxies.
//! The first proxy is dialed directly; each proxy is then asked to CONNECT to
//! the next one, and the last proxy to the target. The resulting
//! [`TunnelHandle`] is an ordinary async byte stream.

pub mod chain;
pub mod config;
pub mod error;
pub mod factory;
pub mod protocol;
pub mod shutdown;
pub mod transport;

pub use chain::{ChainConnector, ChainOptions, ProxyChain, ProxyChainBuilder, ProxyEndpoint, ResolutionPolicy};
pub use config::{Config, ConfigManager};
pub use error::{Error, Phase, Result};
pub use factory::{ConnectFn, Scheme, TunnelFactory};
pub use protocol::{AddressSpec, Credentials, ReplyCode};
pub use shutdown::ShutdownCoordinator;
pub use transport::{Connector, TcpConnector, TunnelHandle};

//! Proxy Chaining
//!
//! Endpoints, resolution policy and the connector that ties hops together.

pub mod connector;
pub mod endpoint;
pub mod resolve;

pub use connector::{ChainConnector, ChainOptions, ProxyChain, ProxyChainBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use endpoint::{ProxyEndpoint, ProxyScheme, ProxyUrl};
pub use resolve::{ResolutionPolicy, Resolver, SystemResolver, DEFAULT_RESOLVE_TIMEOUT};

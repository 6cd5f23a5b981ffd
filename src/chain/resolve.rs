//! Address Resolution Policy
//!
//! Decides which names get turned into IP literals before they go on the wire.
//! Proxy hostnames are resolved best-effort; the final target is either resolved
//! here or handed to the last hop as a domain name.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::ProxyEndpoint;
use crate::error::{Error, Result};
use crate::protocol::AddressSpec;

/// Upper bound on a single hostname lookup unless configured otherwise.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns hostnames into IP addresses, best match first.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// The operating system resolver, through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await?
            .map(|addr| addr.ip())
            .collect();

        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", host),
            ));
        }
        Ok(addrs)
    }
}

/// Where names get resolved during a chain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPolicy {
    /// Send the target as a domain and let the last hop resolve it.
    pub remote_target_resolution: bool,
    /// Resolve proxy hostnames to IP literals before use.
    pub resolve_proxy_hostnames: bool,
    /// On local lookup failure, send the target as a domain instead of failing.
    pub allow_unresolved_fallback: bool,
    pub resolve_timeout: Duration,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            remote_target_resolution: false,
            resolve_proxy_hostnames: true,
            allow_unresolved_fallback: false,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

impl ResolutionPolicy {
    /// Policy with the target resolved by the last proxy.
    pub fn remote() -> Self {
        Self {
            remote_target_resolution: true,
            ..Self::default()
        }
    }

    /// Resolve one hostname to its first address, bounded by `resolve_timeout`.
    pub async fn lookup<R>(&self, resolver: &R, host: &str) -> Result<IpAddr>
    where
        R: Resolver + ?Sized,
    {
        let resolution_error = |reason: String| Error::Resolution {
            host: host.to_string(),
            reason,
        };

        match timeout(self.resolve_timeout, resolver.resolve(host)).await {
            Err(_) => Err(resolution_error(format!(
                "timed out after {:?}",
                self.resolve_timeout
            ))),
            Ok(Err(e)) => Err(resolution_error(e.to_string())),
            Ok(Ok(addrs)) => addrs
                .into_iter()
                .next()
                .ok_or_else(|| resolution_error("no addresses returned".to_string())),
        }
    }

    /// Produce a copy of `chain` with hostnames replaced by IP literals.
    ///
    /// Lookups run concurrently. A failed lookup keeps the hostname; dialing or
    /// forwarding to it will fail on its own if it really can't be reached.
    pub async fn resolve_chain<R>(&self, resolver: &R, chain: &[ProxyEndpoint]) -> Vec<ProxyEndpoint>
    where
        R: Resolver + ?Sized,
    {
        if !self.resolve_proxy_hostnames {
            return chain.to_vec();
        }

        let lookups = chain.iter().enumerate().map(|(i, proxy)| async move {
            let mut entry = proxy.clone();
            if let AddressSpec::Domain(name) = &proxy.address {
                match self.lookup(resolver, name).await {
                    Ok(ip) => {
                        debug!(hop = i + 1, proxy = %name, resolved = %ip, "Resolved proxy hostname");
                        entry.address = AddressSpec::from(ip);
                    }
                    Err(e) => {
                        warn!(hop = i + 1, proxy = %name, "Keeping unresolved proxy hostname: {}", e);
                    }
                }
            }
            entry
        });

        join_all(lookups).await
    }

    /// Decide what address the last hop is asked to connect to.
    pub async fn resolve_target<R>(&self, resolver: &R, target: &AddressSpec) -> Result<AddressSpec>
    where
        R: Resolver + ?Sized,
    {
        let name = match target {
            AddressSpec::Domain(name) => name,
            literal => return Ok(literal.clone()),
        };

        // IP literals are never sent as domains, whatever the policy says.
        let classified = AddressSpec::from_host(name)?;
        if !classified.is_domain() {
            return Ok(classified);
        }

        if self.remote_target_resolution {
            debug!(host = %name, "Leaving target resolution to the last proxy");
            return Ok(classified);
        }

        match self.lookup(resolver, name).await {
            Ok(ip) => {
                debug!(host = %name, resolved = %ip, "Resolved target locally");
                Ok(AddressSpec::from(ip))
            }
            Err(e) if self.allow_unresolved_fallback => {
                warn!(host = %name, "Local resolution failed, sending hostname as-is: {}", e);
                Ok(classified)
            }
            Err(e) => Err(e),
        }
    }
}

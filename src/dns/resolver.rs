//! Resolver abstraction and cancellable single lookups

use super::{ResolutionResult, NO_DNS_RECORD};
use crate::error::ResolveError;
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::{IpAddr, Ipv4Addr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Source of DNS answers
///
/// Implemented by [`SystemResolver`] for real lookups; tests inject their own.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a hostname to its IPv4 addresses (A records)
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError>;

    /// Resolve an address to its PTR names, as returned by the server
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError>;
}

/// Resolver backed by hickory, using the system configuration when available
pub struct SystemResolver {
    inner: TokioResolver,
}

impl SystemResolver {
    /// Create a resolver from the system configuration, falling back to
    /// Cloudflare's public servers when it cannot be read
    pub fn new() -> Self {
        let inner = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                debug!("system resolver configuration unavailable ({e}), using cloudflare");
                TokioResolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        Self { inner }
    }

    /// Wrap an already configured hickory resolver
    pub fn with_resolver(inner: TokioResolver) -> Self {
        Self { inner }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        let lookup = self
            .inner
            .ipv4_lookup(host)
            .await
            .map_err(|e| ResolveError::Failed(e.to_string()))?;
        Ok(lookup.iter().map(|a| a.0).collect())
    }

    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        let lookup = self
            .inner
            .reverse_lookup(ip)
            .await
            .map_err(|e| ResolveError::Failed(e.to_string()))?;
        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }
}

/// Strip the trailing root label dot from a DNS name
pub fn trim_root_dot(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Forward-resolve `host` to its first IPv4 address
///
/// An IPv4 literal resolves to itself. Cancellation wins over a lookup that
/// completes at the same time, and yields [`NO_DNS_RECORD`].
pub async fn forward_lookup(
    resolver: &dyn Resolver,
    host: &str,
    cancel: &CancellationToken,
) -> ResolutionResult {
    if cancel.is_cancelled() {
        return ResolutionResult::forward_failed(host, NO_DNS_RECORD);
    }
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return ResolutionResult::forward(host, addr);
    }

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        res = resolver.lookup_ipv4(host) => {
            res.and_then(|addrs| addrs.first().copied().ok_or(ResolveError::NotFound))
        }
    };

    match outcome {
        Ok(addr) => {
            trace!(host, %addr, "forward lookup");
            ResolutionResult::forward(host, addr)
        }
        Err(ResolveError::Cancelled) => ResolutionResult::forward_failed(host, NO_DNS_RECORD),
        Err(e) => {
            debug!(host, error = %e, "forward lookup failed");
            ResolutionResult::forward_failed(host, e.to_string())
        }
    }
}

/// Reverse-resolve `ip` to its first PTR name, without the trailing dot
pub async fn ptr_lookup(
    resolver: &dyn Resolver,
    ip: IpAddr,
    cancel: &CancellationToken,
) -> ResolutionResult {
    if cancel.is_cancelled() {
        return ResolutionResult::reverse_failed(ip);
    }

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        res = resolver.lookup_ptr(ip) => res,
    };

    let name = outcome.ok().and_then(|names| {
        names
            .first()
            .map(|n| trim_root_dot(n).to_string())
            .filter(|n| !n.is_empty())
    });

    match name {
        Some(name) => {
            trace!(%ip, %name, "reverse lookup");
            ResolutionResult::reverse(ip, name)
        }
        None => ResolutionResult::reverse_failed(ip),
    }
}

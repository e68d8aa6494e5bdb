//! Forward and reverse DNS resolution
//!
//! Hostnames are forward-resolved to IPv4 addresses, IPv4 literals are
//! reverse-resolved to their PTR name. Every lookup races the caller's
//! cancellation token.

pub mod batch;
pub mod resolver;

pub use batch::{resolve_addresses, resolve_targets, Resolutions};
pub use resolver::{forward_lookup, ptr_lookup, Resolver, SystemResolver};

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};

/// Reported instead of an address when a forward lookup is cancelled
pub const NO_DNS_RECORD: &str = "No DNS record found";
/// Reported for every failed or cancelled reverse lookup
pub const PTR_LOOKUP_TIMED_OUT: &str = "PTR record lookup timed out";
/// Placeholder used by the flat address list for failed lookups
pub const LOOKUP_FAILED: &str = "lookup failed";

/// Direction of a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    /// Hostname to IPv4 address (A record)
    Forward,
    /// IPv4 address to name (PTR record)
    Reverse,
}

/// Outcome of resolving one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionResult {
    /// Target exactly as supplied
    pub target: String,
    /// Lookup direction
    pub kind: LookupKind,
    /// Forward: the resolved address or the failure reason.
    /// Reverse: the target address itself.
    pub resolved_address: String,
    /// Forward: the hostname. Reverse: the PTR name or the failure message.
    pub display_name: String,
    /// Whether the lookup produced a record
    pub success: bool,
}

impl ResolutionResult {
    /// Successful forward lookup
    pub fn forward(host: &str, addr: Ipv4Addr) -> Self {
        Self {
            target: host.to_string(),
            kind: LookupKind::Forward,
            resolved_address: addr.to_string(),
            display_name: host.to_string(),
            success: true,
        }
    }

    /// Failed forward lookup carrying a human-readable reason
    pub fn forward_failed(host: &str, reason: impl Into<String>) -> Self {
        Self {
            target: host.to_string(),
            kind: LookupKind::Forward,
            resolved_address: reason.into(),
            display_name: host.to_string(),
            success: false,
        }
    }

    /// Successful reverse lookup
    pub fn reverse(ip: IpAddr, name: impl Into<String>) -> Self {
        Self {
            target: ip.to_string(),
            kind: LookupKind::Reverse,
            resolved_address: ip.to_string(),
            display_name: name.into(),
            success: true,
        }
    }

    /// Failed reverse lookup
    pub fn reverse_failed(ip: IpAddr) -> Self {
        Self {
            target: ip.to_string(),
            kind: LookupKind::Reverse,
            resolved_address: ip.to_string(),
            display_name: PTR_LOOKUP_TIMED_OUT.to_string(),
            success: false,
        }
    }

    /// The value the lookup produced: an address for forward lookups,
    /// a name for reverse ones (or the failure text)
    pub fn value(&self) -> &str {
        match self.kind {
            LookupKind::Forward => &self.resolved_address,
            LookupKind::Reverse => &self.display_name,
        }
    }

    /// The address this result is about, if it has one
    pub fn address(&self) -> Option<IpAddr> {
        self.target
            .parse()
            .ok()
            .or_else(|| self.value().parse().ok())
    }
}

/// Whether a string is a dotted-quad IPv4 literal
pub fn is_ipv4_literal(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

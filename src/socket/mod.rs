//! ICMP socket layer
//!
//! Raw ICMP sockets are opened per operation: one per echo exchange for the
//! prober and one per run for the hop tracer. Message framing lives in
//! [`packet`], socket handling in [`icmp`].

use crate::probe::EchoIds;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub mod icmp;
pub mod packet;
pub mod utils;

pub use icmp::RawIcmpSocket;

/// IP version of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    /// IPv4 addressing
    V4,
    /// IPv6 addressing (echo only, never traced)
    V6,
}

impl IpVersion {
    /// IP version of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            IpVersion::V4 => "ICMP",
            IpVersion::V6 => "ICMPv6",
        }
    }
}

/// Kind of ICMP message received in answer to an echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Echo Reply: the destination answered
    EchoReply,
    /// Time Exceeded: a router dropped the request when its TTL hit zero
    TimeExceeded,
    /// Destination Unreachable, with the ICMP code
    DestinationUnreachable(u8),
    /// An echo request, usually our own request looped back on a local target
    EchoRequest,
    /// Any other ICMP type
    Other(u8),
}

/// A parsed ICMP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpReply {
    /// What kind of message it is
    pub kind: ReplyKind,
    /// Identifier/sequence of the echo request it refers to, when known
    ///
    /// For echo messages these are read from the header; for error messages
    /// they come from the quoted original datagram.
    pub ids: Option<EchoIds>,
}

impl IcmpReply {
    /// Whether this message answers the echo request carrying `ids`
    pub fn answers(&self, ids: EchoIds) -> bool {
        self.ids == Some(ids) && self.kind != ReplyKind::EchoRequest
    }
}

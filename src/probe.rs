//! Probe-related types shared by the prober, the scheduler and the tracer

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// RTTs below this threshold are reported as `<1 ms`
pub const SUB_MILLISECOND_THRESHOLD: Duration = Duration::from_micros(500);

/// Identifier and sequence number carried by one echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EchoIds {
    /// ICMP identifier field
    pub identifier: u16,
    /// ICMP sequence number field
    pub sequence: u16,
}

/// Outcome of a single echo exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Target as supplied by the caller
    pub target: String,
    /// Address the echo request was sent to, if the target resolved
    pub address: Option<IpAddr>,
    /// Round-trip time; zero on any failure
    pub rtt: Duration,
    /// Whether an echo reply was received
    pub success: bool,
}

impl ProbeResult {
    /// Build a result from an observed RTT; zero means failure
    pub fn from_rtt(target: impl Into<String>, address: Option<IpAddr>, rtt: Duration) -> Self {
        Self {
            target: target.into(),
            address,
            rtt,
            success: !rtt.is_zero(),
        }
    }

    /// A failed probe
    pub fn failed(target: impl Into<String>, address: Option<IpAddr>) -> Self {
        Self::from_rtt(target, address, Duration::ZERO)
    }

    /// Classify the RTT for display
    pub fn class(&self) -> RttClass {
        RttClass::classify(self.rtt)
    }
}

/// Display bucket for a probe RTT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RttClass {
    /// Reply arrived in under half a millisecond
    SubMillisecond,
    /// Reply arrived after the given number of (rounded) milliseconds
    Millis(u64),
    /// No reply
    Timeout,
}

impl RttClass {
    /// Classify an RTT, where zero means no reply was received
    pub fn classify(rtt: Duration) -> Self {
        if rtt.is_zero() {
            RttClass::Timeout
        } else if rtt < SUB_MILLISECOND_THRESHOLD {
            RttClass::SubMillisecond
        } else {
            RttClass::Millis((rtt.as_secs_f64() * 1000.0).round() as u64)
        }
    }

    /// Whether this bucket represents a received reply
    pub fn is_reply(&self) -> bool {
        !matches!(self, RttClass::Timeout)
    }
}

impl fmt::Display for RttClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RttClass::SubMillisecond => write!(f, "<1 ms"),
            RttClass::Millis(ms) => write!(f, "{ms} ms"),
            RttClass::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

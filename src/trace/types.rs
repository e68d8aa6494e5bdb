//! Records and events produced by the hop tracer

use super::config::PROBES_PER_HOP;
use crate::probe::RttClass;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Peer text of a hop where no probe was answered
pub const REQUEST_TIMED_OUT: &str = "Request timed out";

/// Outcome of one probe within a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "rtt", rename_all = "snake_case")]
pub enum HopSample {
    /// A router or the destination answered after this long
    Reply(Duration),
    /// No answer before the probe timeout
    Timeout,
    /// The answer was neither Time Exceeded nor Echo Reply
    Unexpected,
}

impl fmt::Display for HopSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // A reply is never shown as a timeout, even when it rounds to zero
            HopSample::Reply(rtt) => match RttClass::classify(*rtt) {
                RttClass::Timeout => write!(f, "<1 ms"),
                class => write!(f, "{class}"),
            },
            HopSample::Timeout => write!(f, "*"),
            HopSample::Unexpected => write!(f, "Unexpected ICMP message"),
        }
    }
}

/// Everything learned about one hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceHopRecord {
    /// TTL the probes were sent with, starting at 1
    pub hop: u8,
    /// Address of the last peer that answered, if any
    pub peer: Option<IpAddr>,
    /// PTR name of the peer, when it has one
    pub peer_name: Option<String>,
    /// One sample per probe
    pub samples: [HopSample; PROBES_PER_HOP],
    /// Whether the destination itself answered; such a record is the last
    pub destination_reached: bool,
}

impl TraceHopRecord {
    /// Peer column: `name [addr]`, `addr`, or [`REQUEST_TIMED_OUT`]
    pub fn peer_text(&self) -> String {
        match (&self.peer, &self.peer_name) {
            (Some(addr), Some(name)) => format!("{name} [{addr}]"),
            (Some(addr), None) => addr.to_string(),
            (None, _) => REQUEST_TIMED_OUT.to_string(),
        }
    }

    /// Render as `[hop, peer, s0, s1, s2]`, hop right-aligned to width 2
    pub fn to_fields(&self) -> Vec<String> {
        let mut fields = Vec::with_capacity(2 + PROBES_PER_HOP);
        fields.push(format!("{:2}", self.hop));
        fields.push(self.peer_text());
        fields.extend(self.samples.iter().map(ToString::to_string));
        fields
    }
}

impl fmt::Display for TraceHopRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_fields().join("  "))
    }
}

/// Live output of a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A hop finished probing
    Hop(TraceHopRecord),
    /// The trace stopped on an error; no further hops follow in this run
    Diagnostic {
        /// Human-readable description
        message: String,
    },
    /// A run of the repeating tracer ended
    RunFinished {
        /// Run number, starting at 1
        run: u64,
    },
}

impl TraceEvent {
    /// Text fields as shown to a user
    pub fn to_fields(&self) -> Vec<String> {
        match self {
            TraceEvent::Hop(record) => record.to_fields(),
            TraceEvent::Diagnostic { message } => vec![message.clone()],
            TraceEvent::RunFinished { run } => vec![format!("Trace #{run} complete")],
        }
    }
}

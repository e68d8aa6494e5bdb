//! Hop-by-hop path discovery over ICMP echo with increasing TTL

pub mod config;
pub mod continuous;
pub mod engine;
pub mod types;

pub use config::{TraceConfig, TraceConfigBuilder, PROBES_PER_HOP};
pub use continuous::RepeatingTracer;
pub use engine::{HopReply, HopSocket, HopTracer, IcmpTraceTransport, TraceOutcome, TraceTransport};
pub use types::{HopSample, TraceEvent, TraceHopRecord, REQUEST_TIMED_OUT};

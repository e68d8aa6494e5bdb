//! pingotrace - concurrent ICMP ping, traceroute and trace-then-ping engine
//!
//! This library resolves targets in both directions, measures round-trip
//! latency with ICMP echo, discovers the routers on the path to a
//! destination, and combines the two by pinging every hop of a trace. Every
//! long-running operation runs under a cancellation token and streams its
//! results over a channel.
//!
//! # Example
//!
//! ```no_run
//! use pingotrace::{Session, TraceConfig, TraceEvent};
//!
//! # async fn example() -> Result<(), String> {
//! let session = Session::builder().build()?;
//! let scope = session.begin_operation().await;
//! let mut events = session.start_trace(&scope, "example.com", TraceConfig::default());
//! while let Some(event) = events.recv().await {
//!     if let TraceEvent::Hop(hop) = event {
//!         println!("{hop}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod ping;
pub mod pingpath;
pub mod probe;
pub mod session;
pub mod socket;
pub mod targets;
pub mod trace;

// Re-export core types for library users
pub use config::TimingConfig;
pub use dns::{LookupKind, ResolutionResult, Resolutions, Resolver, SystemResolver};
pub use error::{ProbeError, ResolveError, TargetParseError};
pub use ping::scheduler::{ContinuousPing, PingEvent, PingSample};
pub use ping::{plan_targets, IcmpProber, PingPlan, PingTarget, Prober};
pub use pingpath::{PingPath, PingPathEvent};
pub use probe::{ProbeResult, RttClass};
pub use session::{IcmpSequencer, OperationScope, Session, SessionBuilder};
pub use targets::TargetList;
pub use trace::{
    HopReply, HopSample, HopSocket, HopTracer, RepeatingTracer, TraceConfig, TraceConfigBuilder,
    TraceEvent, TraceHopRecord, TraceOutcome, TraceTransport,
};
pub use tokio_util::sync::CancellationToken;

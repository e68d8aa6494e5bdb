//! Sequential TTL-stepping hop tracer
//!
//! One socket is opened per run. For each TTL the tracer sends
//! [`PROBES_PER_HOP`] echo requests one after another, waits for each answer
//! up to the probe timeout, and emits one record per hop as soon as the hop
//! is done. An Echo Reply ends the run after its hop's record.

use super::config::{TraceConfig, PROBES_PER_HOP};
use super::types::{HopSample, TraceEvent, TraceHopRecord};
use crate::dns::{ptr_lookup, Resolver};
use crate::error::{ProbeError, ResolveError};
use crate::probe::EchoIds;
use crate::session::IcmpSequencer;
use crate::socket::icmp::Received;
use crate::socket::{IpVersion, RawIcmpSocket, ReplyKind};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// Answer to one hop probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopReply {
    /// Who answered
    pub peer: IpAddr,
    /// What kind of message came back
    pub kind: ReplyKind,
    /// Time between send and receive
    pub rtt: Duration,
}

/// A socket able to send TTL-limited echo requests
#[async_trait]
pub trait HopSocket: Send {
    /// Set the TTL used by subsequent probes
    fn set_ttl(&mut self, ttl: u8) -> Result<(), ProbeError>;

    /// Send one echo request and wait up to `timeout` for its answer
    ///
    /// `Ok(None)` means the probe timed out.
    async fn probe(
        &mut self,
        dest: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Option<HopReply>, ProbeError>;
}

/// Opens hop sockets; one per trace run
pub trait TraceTransport: Send + Sync {
    /// Open a socket for a new run
    fn open(&self) -> Result<Box<dyn HopSocket>, ProbeError>;
}

/// Transport over raw ICMPv4 sockets
pub struct IcmpTraceTransport {
    sequencer: Arc<IcmpSequencer>,
    poll_interval: Duration,
}

impl IcmpTraceTransport {
    /// Create a transport drawing identifiers from `sequencer`
    pub fn new(sequencer: Arc<IcmpSequencer>, poll_interval: Duration) -> Self {
        Self {
            sequencer,
            poll_interval,
        }
    }
}

impl TraceTransport for IcmpTraceTransport {
    fn open(&self) -> Result<Box<dyn HopSocket>, ProbeError> {
        let socket = RawIcmpSocket::open(IpVersion::V4, self.poll_interval)?;
        Ok(Box::new(IcmpHopSocket {
            socket,
            sequencer: Arc::clone(&self.sequencer),
        }))
    }
}

struct IcmpHopSocket {
    socket: RawIcmpSocket,
    sequencer: Arc<IcmpSequencer>,
}

#[async_trait]
impl HopSocket for IcmpHopSocket {
    fn set_ttl(&mut self, ttl: u8) -> Result<(), ProbeError> {
        self.socket.set_ttl(ttl)
    }

    async fn probe(
        &mut self,
        dest: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Option<HopReply>, ProbeError> {
        let ids = self.sequencer.next_ids();
        let sent_at = self.socket.send_echo(IpAddr::V4(dest), ids)?;
        let deadline = sent_at + timeout;

        while let Some(received) = self.socket.recv_until(deadline).await? {
            if let Some(reply) = match_hop_reply(ids, sent_at, &received) {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }
}

/// The hop answer carried by `received`, if it answers the request with `ids`
///
/// The raw socket sees every ICMP message for this host, so anything that
/// cannot be tied to this request is skipped.
fn match_hop_reply(ids: EchoIds, sent_at: Instant, received: &Received) -> Option<HopReply> {
    let peer = received.peer?;
    let reply = received.reply?;
    reply.answers(ids).then(|| HopReply {
        peer,
        kind: reply.kind,
        rtt: received.at.duration_since(sent_at),
    })
}

/// How a trace run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    /// All hops up to the destination or `max_hops` were probed
    Completed {
        /// Number of hop records emitted
        hops: u8,
        /// Whether the destination answered
        destination_reached: bool,
    },
    /// A diagnostic was emitted and the run stopped
    Failed,
    /// Cancellation fired or the receiver went away
    Cancelled,
}

/// Runs single traces
pub struct HopTracer {
    transport: Arc<dyn TraceTransport>,
    resolver: Arc<dyn Resolver>,
    config: TraceConfig,
}

impl HopTracer {
    /// Create a tracer
    pub fn new(
        transport: Arc<dyn TraceTransport>,
        resolver: Arc<dyn Resolver>,
        config: TraceConfig,
    ) -> Self {
        Self {
            transport,
            resolver,
            config,
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    async fn resolve_destination(
        &self,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Ipv4Addr, ResolveError> {
        if let Ok(addr) = destination.parse::<Ipv4Addr>() {
            return Ok(addr);
        }
        let addrs = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            res = self.resolver.lookup_ipv4(destination) => res?,
        };
        addrs.first().copied().ok_or(ResolveError::NotFound)
    }

    /// Trace the path to `destination`, sending events to `events`
    ///
    /// Dropping the sender when this returns closes the stream for the
    /// caller.
    #[instrument(skip(self, events, cancel), fields(max_hops = self.config.max_hops))]
    pub async fn run(
        &self,
        destination: &str,
        events: &mpsc::Sender<TraceEvent>,
        cancel: &CancellationToken,
    ) -> TraceOutcome {
        let dest = match self.resolve_destination(destination, cancel).await {
            Ok(dest) => dest,
            Err(ResolveError::Cancelled) => return TraceOutcome::Cancelled,
            Err(e) => {
                let message = format!("Unable to resolve destination IP address: {e}");
                return diagnostic(events, message, cancel).await;
            }
        };

        let mut socket = match self.transport.open() {
            Ok(socket) => socket,
            Err(e) => {
                let message = format!("Unable to open ICMP connection: {e}");
                return diagnostic(events, message, cancel).await;
            }
        };

        debug!(%dest, "tracing");
        for hop in 1..=self.config.max_hops {
            if cancel.is_cancelled() {
                return TraceOutcome::Cancelled;
            }

            if let Err(e) = socket.set_ttl(hop) {
                let message = format!("Unable to set TTL: {e}");
                return diagnostic(events, message, cancel).await;
            }

            let mut samples = [HopSample::Timeout; PROBES_PER_HOP];
            let mut peer = None;
            let mut destination_reached = false;

            for sample in samples.iter_mut() {
                let answer = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TraceOutcome::Cancelled,
                    answer = socket.probe(dest, self.config.probe_timeout) => answer,
                };

                match answer {
                    Ok(None) => {}
                    Ok(Some(reply)) => {
                        peer = Some(reply.peer);
                        *sample = match reply.kind {
                            ReplyKind::TimeExceeded => HopSample::Reply(reply.rtt),
                            ReplyKind::EchoReply => {
                                destination_reached = true;
                                HopSample::Reply(reply.rtt)
                            }
                            _ => HopSample::Unexpected,
                        };
                    }
                    Err(e) => return diagnostic(events, probe_failure(&e), cancel).await,
                }
            }

            let peer_name = match peer {
                Some(addr) if self.config.resolve_hops => {
                    let ptr = ptr_lookup(self.resolver.as_ref(), addr, cancel).await;
                    ptr.success.then(|| ptr.display_name)
                }
                _ => None,
            };

            if cancel.is_cancelled() {
                return TraceOutcome::Cancelled;
            }

            let record = TraceHopRecord {
                hop,
                peer,
                peer_name,
                samples,
                destination_reached,
            };
            trace!(%record, "hop");
            if !publish(events, TraceEvent::Hop(record), cancel).await {
                return TraceOutcome::Cancelled;
            }

            if destination_reached {
                return TraceOutcome::Completed {
                    hops: hop,
                    destination_reached: true,
                };
            }
        }

        TraceOutcome::Completed {
            hops: self.config.max_hops,
            destination_reached: false,
        }
    }
}

/// Diagnostic text for an error raised while probing a hop
fn probe_failure(err: &ProbeError) -> String {
    match err {
        ProbeError::SendError(msg) | ProbeError::MarshalError(msg) => {
            format!("Unable to send ICMP message: {msg}")
        }
        ProbeError::ReceiveError(msg) => format!("Unable to read ICMP message: {msg}"),
        other => format!("Unable to send ICMP message: {other}"),
    }
}

/// Send `event` unless `cancel` fires first
///
/// Returns `false` when the event was not delivered, either because the
/// operation was cancelled or because the receiver is gone.
pub(crate) async fn publish(
    events: &mpsc::Sender<TraceEvent>,
    event: TraceEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

async fn diagnostic(
    events: &mpsc::Sender<TraceEvent>,
    message: String,
    cancel: &CancellationToken,
) -> TraceOutcome {
    debug!(%message, "trace stopped");
    if publish(events, TraceEvent::Diagnostic { message }, cancel).await {
        TraceOutcome::Failed
    } else {
        TraceOutcome::Cancelled
    }
}

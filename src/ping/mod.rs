//! ICMP echo probing and ping target planning

pub mod scheduler;

use crate::config::TimingConfig;
use crate::dns::{is_ipv4_literal, Resolutions};
use crate::error::ProbeError;
use crate::probe::{EchoIds, ProbeResult};
use crate::session::IcmpSequencer;
use crate::socket::icmp::Received;
use crate::socket::{IpVersion, RawIcmpSocket, ReplyKind};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};

/// Performs a single echo exchange with a target
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target` once; failures are reported in the result, never raised
    async fn probe(&self, target: &str) -> ProbeResult;
}

/// Prober sending real ICMP echo requests over raw sockets
///
/// One socket is opened per exchange and closed when the exchange ends.
pub struct IcmpProber {
    sequencer: Arc<IcmpSequencer>,
    timing: TimingConfig,
}

impl IcmpProber {
    /// Create a prober drawing identifiers from `sequencer`
    pub fn new(sequencer: Arc<IcmpSequencer>, timing: TimingConfig) -> Self {
        Self { sequencer, timing }
    }

    /// Send one echo request to `addr` and wait for the matching reply
    ///
    /// A zero duration means no usable reply arrived before the deadline.
    async fn exchange(&self, addr: IpAddr) -> Result<Duration, ProbeError> {
        let socket = RawIcmpSocket::open(IpVersion::of(&addr), self.timing.socket_poll_interval)?;
        let ids = self.sequencer.next_ids();
        let sent_at = socket.send_echo(addr, ids)?;
        let deadline = sent_at + self.timing.probe_deadline;

        loop {
            let Some(received) = socket.recv_until(deadline).await? else {
                trace!(%addr, "deadline reached");
                return Ok(Duration::ZERO);
            };

            match judge_echo(addr, ids, sent_at, &received) {
                EchoVerdict::Ignore => {}
                EchoVerdict::Reply(rtt) => return Ok(rtt),
                EchoVerdict::Refused(kind) => {
                    debug!(%addr, ?kind, "target answered without an echo reply");
                    return Ok(Duration::ZERO);
                }
                EchoVerdict::Malformed => return Err(ProbeError::MalformedPacket),
            }
        }
    }
}

/// What one datagram means for a pending echo exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EchoVerdict {
    /// Not an answer to this exchange; keep waiting
    Ignore,
    /// The target answered after this long
    Reply(Duration),
    /// The target answered with something other than an echo reply
    Refused(ReplyKind),
    /// The target sent something that could not be parsed
    Malformed,
}

/// Decide what `received` means for the echo request `ids` sent to `addr`
fn judge_echo(addr: IpAddr, ids: EchoIds, sent_at: Instant, received: &Received) -> EchoVerdict {
    if received.peer != Some(addr) {
        return EchoVerdict::Ignore;
    }
    let Some(reply) = received.reply else {
        return EchoVerdict::Malformed;
    };

    match reply.kind {
        ReplyKind::EchoReply if reply.ids.map(|r| r.sequence) == Some(ids.sequence) => {
            // Never report a zero RTT for a real reply
            EchoVerdict::Reply(received.at.duration_since(sent_at) + Duration::from_nanos(1))
        }
        // A reply to some other request, or our own request on a loopback target
        ReplyKind::EchoReply | ReplyKind::EchoRequest => EchoVerdict::Ignore,
        other => EchoVerdict::Refused(other),
    }
}

/// Pick the address to probe: IPv4 first, IPv6 only as a fallback
pub async fn resolve_probe_address(target: &str) -> Option<IpAddr> {
    if let Ok(addr) = target.parse::<IpAddr>() {
        return Some(addr);
    }
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((target, 0))
        .await
        .ok()?
        .map(|sa| sa.ip())
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

#[async_trait]
impl Prober for IcmpProber {
    #[instrument(skip(self), level = "trace")]
    async fn probe(&self, target: &str) -> ProbeResult {
        let Some(addr) = resolve_probe_address(target).await else {
            debug!(target, "unable to resolve probe target");
            return ProbeResult::failed(target, None);
        };

        match self.exchange(addr).await {
            Ok(rtt) => ProbeResult::from_rtt(target, Some(addr), rtt),
            Err(e) => {
                debug!(target, error = %e, "probe failed");
                ProbeResult::failed(target, Some(addr))
            }
        }
    }
}

/// One address to ping continuously, with its header line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingTarget {
    /// Address handed to the prober
    pub address: String,
    /// Header line shown above the target's results
    pub label: String,
}

/// Targets to ping plus the hostnames that could not be resolved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PingPlan {
    /// Targets in input order, one per distinct address
    pub targets: Vec<PingTarget>,
    /// `(hostname, reason)` for each failed forward lookup
    pub failures: Vec<(String, String)>,
}

/// Turn resolutions into ping targets
///
/// IPv4 targets are labelled `Pinging <ip> [<name>]`, falling back to the
/// address itself when the PTR lookup failed. Hostnames are labelled
/// `Pinging <host> [<ip>]`; failed ones go to [`PingPlan::failures`].
/// An address appears at most once.
pub fn plan_targets(resolutions: &Resolutions) -> PingPlan {
    let mut plan = PingPlan::default();
    let mut addresses = HashSet::new();

    for result in resolutions.iter() {
        let key = &result.target;
        let (address, label) = if is_ipv4_literal(key) {
            let name = if result.success {
                result.value()
            } else {
                key.as_str()
            };
            (key.clone(), format!("Pinging {key} [{name}]"))
        } else if result.success {
            let ip = result.value();
            (ip.to_string(), format!("Pinging {key} [{ip}]"))
        } else {
            plan.failures.push((key.clone(), result.value().to_string()));
            continue;
        };

        if addresses.insert(address.clone()) {
            plan.targets.push(PingTarget { address, label });
        }
    }
    plan
}

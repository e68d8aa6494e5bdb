//! Mock collaborators shared by the integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use pingotrace::socket::ReplyKind;
use pingotrace::{
    HopReply, HopSocket, ProbeError, ProbeResult, Prober, ResolveError, Resolver, TimingConfig,
    TraceTransport,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timing suitable for tests: millisecond intervals, no grace period
pub fn fast_timing() -> TimingConfig {
    let mut timing = TimingConfig::defaults();
    timing.probe_deadline = Duration::from_millis(50);
    timing.ping_interval = Duration::from_millis(2);
    timing.trace_repeat_delay = Duration::from_millis(5);
    timing.pingpath_grace = Duration::ZERO;
    timing.abandon_timeout = Duration::from_secs(1);
    timing
}

/// Resolver answering from fixed tables and counting calls
#[derive(Default)]
pub struct MockResolver {
    pub forward: HashMap<String, Ipv4Addr>,
    pub reverse: HashMap<IpAddr, String>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forward(mut self, host: &str, addr: [u8; 4]) -> Self {
        self.forward.insert(host.to_string(), Ipv4Addr::from(addr));
        self
    }

    /// Register a PTR name; stored with the trailing root dot like a server returns it
    pub fn with_reverse(mut self, addr: [u8; 4], name: &str) -> Self {
        self.reverse
            .insert(IpAddr::V4(Ipv4Addr::from(addr)), format!("{name}."));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.forward
            .get(host)
            .map(|addr| vec![*addr])
            .ok_or_else(|| ResolveError::Failed(format!("no such host: {host}")))
    }

    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reverse
            .get(&ip)
            .map(|name| vec![name.clone()])
            .ok_or(ResolveError::NotFound)
    }
}

/// Prober recording the order of calls; per-target RTT and delay
#[derive(Default)]
pub struct MockProber {
    pub log: Mutex<Vec<String>>,
    pub rtts: HashMap<String, Duration>,
    pub delays: HashMap<String, Duration>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rtt(mut self, target: &str, rtt: Duration) -> Self {
        self.rtts.insert(target.to_string(), rtt);
        self
    }

    pub fn with_delay(mut self, target: &str, delay: Duration) -> Self {
        self.delays.insert(target.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, target: &str) -> ProbeResult {
        self.log.lock().unwrap().push(target.to_string());
        if let Some(delay) = self.delays.get(target) {
            tokio::time::sleep(*delay).await;
        }
        let rtt = self.rtts.get(target).copied().unwrap_or(Duration::ZERO);
        ProbeResult::from_rtt(target, target.parse().ok(), rtt)
    }
}

/// What the simulated network does with a probe at a given TTL
#[derive(Debug, Clone, Copy)]
pub enum HopBehaviour {
    /// A router at this address answers with Time Exceeded
    Router([u8; 4]),
    /// Nobody answers
    Silent,
    /// Sending fails
    SendFails,
}

/// Simulated path: hops before the destination, then the destination itself
#[derive(Clone)]
pub struct MockPath {
    pub hops: Vec<HopBehaviour>,
    pub open_fails: bool,
    pub ttl_fails: bool,
    pub opened: Arc<AtomicUsize>,
    pub probes: Arc<AtomicUsize>,
}

impl MockPath {
    pub fn new(hops: Vec<HopBehaviour>) -> Self {
        Self {
            hops,
            open_fails: false,
            ttl_fails: false,
            opened: Arc::new(AtomicUsize::new(0)),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl TraceTransport for MockPath {
    fn open(&self) -> Result<Box<dyn HopSocket>, ProbeError> {
        if self.open_fails {
            return Err(ProbeError::InsufficientPermissions {
                required: "root or CAP_NET_RAW".to_string(),
                suggestion: "Run with sudo".to_string(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHopSocket {
            path: self.clone(),
            ttl: 0,
        }))
    }
}

struct MockHopSocket {
    path: MockPath,
    ttl: u8,
}

#[async_trait]
impl HopSocket for MockHopSocket {
    fn set_ttl(&mut self, ttl: u8) -> Result<(), ProbeError> {
        if self.path.ttl_fails {
            return Err(ProbeError::SocketError("operation not permitted".to_string()));
        }
        self.ttl = ttl;
        Ok(())
    }

    async fn probe(
        &mut self,
        dest: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Option<HopReply>, ProbeError> {
        self.path.probes.fetch_add(1, Ordering::SeqCst);
        let index = usize::from(self.ttl) - 1;
        let rtt = Duration::from_millis(u64::from(self.ttl));

        match self.path.hops.get(index) {
            Some(HopBehaviour::Router(addr)) => Ok(Some(HopReply {
                peer: IpAddr::V4(Ipv4Addr::from(*addr)),
                kind: ReplyKind::TimeExceeded,
                rtt,
            })),
            Some(HopBehaviour::Silent) => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            Some(HopBehaviour::SendFails) => {
                Err(ProbeError::SendError("network is unreachable".to_string()))
            }
            None => Ok(Some(HopReply {
                peer: IpAddr::V4(dest),
                kind: ReplyKind::EchoReply,
                rtt,
            })),
        }
    }
}

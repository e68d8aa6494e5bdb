//! Probing session: shared collaborators, ICMP identifiers and operation scopes
//!
//! A [`Session`] owns everything that outlives a single operation: the
//! resolver, prober and trace transport, the ICMP identifier sequencer and the
//! currently active [`OperationScope`]. Starting a new operation supersedes the
//! previous one.

use crate::config::TimingConfig;
use crate::dns::{self, Resolutions, Resolver, SystemResolver};
use crate::ping::scheduler::{ContinuousPing, PingEvent};
use crate::ping::{IcmpProber, PingTarget, Prober};
use crate::pingpath::{PingPath, PingPathEvent};
use crate::probe::{EchoIds, ProbeResult};
use crate::trace::continuous::RepeatingTracer;
use crate::trace::engine::{HopTracer, IcmpTraceTransport, TraceTransport};
use crate::trace::{TraceConfig, TraceEvent};
use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Capacity of the event channels handed to callers
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Source of ICMP identifier/sequence pairs
///
/// Each call advances a shared counter by two and uses the two values as
/// identifier and sequence, so no two requests issued within one wrap of the
/// counter share a pair.
#[derive(Debug, Default)]
pub struct IcmpSequencer {
    counter: AtomicU16,
}

impl IcmpSequencer {
    /// Start counting from zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from `start`, e.g. to keep concurrent processes apart
    pub fn starting_at(start: u16) -> Self {
        Self {
            counter: AtomicU16::new(start),
        }
    }

    /// Allocate the identifiers for one echo request
    pub fn next_ids(&self) -> EchoIds {
        let n = self.counter.fetch_add(2, Ordering::Relaxed);
        EchoIds {
            identifier: n,
            sequence: n.wrapping_add(1),
        }
    }
}

/// Cancellation token and task tracker for one user-initiated operation
#[derive(Debug, Clone, Default)]
pub struct OperationScope {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl OperationScope {
    /// A fresh, uncancelled scope
    pub fn new() -> Self {
        Self::default()
    }

    /// The cancellation token shared by every task of the operation
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawn a task that belongs to this operation
    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Cancel the operation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the operation has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for every spawned task to finish
    ///
    /// Closes the tracker first, so no further tasks can be added.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancel, then wait up to `limit` for the tasks to wind down
    ///
    /// Returns `false` when tasks were still running at the limit; they are
    /// left to finish on their own and deliver nothing.
    pub async fn shutdown(&self, limit: Duration) -> bool {
        self.cancel();
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}

/// Sleep for `duration` unless `cancel` fires first
///
/// Returns `false` when cancelled.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Holder of the currently active operation scope
#[derive(Debug, Default)]
struct Operations {
    current: Mutex<Option<OperationScope>>,
}

impl Operations {
    async fn begin(&self, abandon_timeout: Duration) -> OperationScope {
        let scope = OperationScope::new();
        let previous = self.current.lock().await.replace(scope.clone());

        if let Some(previous) = previous {
            debug!("superseding previous operation");
            if !previous.shutdown(abandon_timeout).await {
                warn!(
                    "previous operation did not stop within {:?}, abandoning it",
                    abandon_timeout
                );
            }
        }
        scope
    }

    async fn cancel_current(&self) {
        if let Some(scope) = self.current.lock().await.as_ref() {
            scope.cancel();
        }
    }
}

/// Entry point for every probing operation
#[derive(Clone)]
pub struct Session {
    resolver: Arc<dyn Resolver>,
    prober: Arc<dyn Prober>,
    transport: Arc<dyn TraceTransport>,
    sequencer: Arc<IcmpSequencer>,
    timing: TimingConfig,
    operations: Arc<Operations>,
}

impl Session {
    /// Start building a session
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Timing in effect for this session
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// The resolver used by every lookup
    pub fn resolver(&self) -> Arc<dyn Resolver> {
        Arc::clone(&self.resolver)
    }

    /// The prober used for echo exchanges
    pub fn prober(&self) -> Arc<dyn Prober> {
        Arc::clone(&self.prober)
    }

    /// The identifier sequencer shared by the prober and the tracer
    pub fn sequencer(&self) -> Arc<IcmpSequencer> {
        Arc::clone(&self.sequencer)
    }

    /// Start a new operation, cancelling and draining the previous one
    pub async fn begin_operation(&self) -> OperationScope {
        self.operations.begin(self.timing.abandon_timeout).await
    }

    /// Cancel the active operation, if any
    pub async fn cancel_operation(&self) {
        self.operations.cancel_current().await;
    }

    /// Resolve targets in both directions
    pub async fn resolve_targets(
        &self,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> Resolutions {
        dns::resolve_targets(
            self.resolver.as_ref(),
            targets,
            cancel,
            self.timing.max_concurrent_lookups,
        )
        .await
    }

    /// Resolve targets to a flat address list
    pub async fn resolve_addresses(
        &self,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> Vec<String> {
        dns::resolve_addresses(
            self.resolver.as_ref(),
            targets,
            cancel,
            self.timing.max_concurrent_lookups,
        )
        .await
    }

    /// One echo exchange
    pub async fn probe(&self, target: &str) -> ProbeResult {
        self.prober.probe(target).await
    }

    fn hop_tracer(&self, config: TraceConfig) -> HopTracer {
        HopTracer::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.resolver),
            config,
        )
    }

    /// Trace the path to `destination` once, streaming one event per hop
    ///
    /// The channel closes when the trace ends or the scope is cancelled.
    pub fn start_trace(
        &self,
        scope: &OperationScope,
        destination: &str,
        config: TraceConfig,
    ) -> mpsc::Receiver<TraceEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let tracer = self.hop_tracer(config);
        let destination = destination.to_string();
        let cancel = scope.token().clone();
        scope.spawn(async move {
            tracer.run(&destination, &tx, &cancel).await;
        });
        rx
    }

    /// Trace the path to `destination` repeatedly until the scope is cancelled
    pub fn start_repeating_trace(
        &self,
        scope: &OperationScope,
        destination: &str,
        config: TraceConfig,
    ) -> mpsc::Receiver<TraceEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let repeating =
            RepeatingTracer::new(self.hop_tracer(config), self.timing.trace_repeat_delay);
        let destination = destination.to_string();
        let cancel = scope.token().clone();
        scope.spawn(async move {
            repeating.run(&destination, &tx, &cancel).await;
        });
        rx
    }

    /// Ping every target continuously until the scope is cancelled
    pub fn start_ping(
        &self,
        scope: &OperationScope,
        targets: Vec<PingTarget>,
    ) -> mpsc::Receiver<PingEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        ContinuousPing::new(Arc::clone(&self.prober), self.timing.clone()).start(
            scope,
            targets,
            tx,
        );
        rx
    }

    /// Trace `destination` once, then ping every hop continuously
    pub fn start_pingpath(
        &self,
        scope: &OperationScope,
        destination: &str,
        config: TraceConfig,
    ) -> mpsc::Receiver<PingPathEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pingpath = PingPath::new(self.clone(), config);
        let destination = destination.to_string();
        let task_scope = scope.clone();
        scope.spawn(async move {
            pingpath.run(&task_scope, &destination, tx).await;
        });
        rx
    }
}

/// Builder for [`Session`]; unset collaborators get their ICMP/DNS defaults
#[derive(Default)]
pub struct SessionBuilder {
    resolver: Option<Arc<dyn Resolver>>,
    prober: Option<Arc<dyn Prober>>,
    transport: Option<Arc<dyn TraceTransport>>,
    sequencer: Option<Arc<IcmpSequencer>>,
    timing: Option<TimingConfig>,
}

impl SessionBuilder {
    /// Use a custom resolver
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom prober
    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Use a custom trace transport
    pub fn transport(mut self, transport: Arc<dyn TraceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing identifier sequencer
    pub fn sequencer(mut self, sequencer: Arc<IcmpSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    /// Override the timing configuration
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Build the session
    pub fn build(self) -> Result<Session, String> {
        let timing = self.timing.unwrap_or_else(TimingConfig::current);
        timing.validate()?;

        let sequencer = self
            .sequencer
            .unwrap_or_else(|| Arc::new(IcmpSequencer::starting_at(std::process::id() as u16)));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemResolver::new()));
        let prober = self.prober.unwrap_or_else(|| {
            Arc::new(IcmpProber::new(Arc::clone(&sequencer), timing.clone()))
        });
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(IcmpTraceTransport::new(
                Arc::clone(&sequencer),
                timing.socket_poll_interval,
            ))
        });

        Ok(Session {
            resolver,
            prober,
            transport,
            sequencer,
            timing,
            operations: Arc::new(Operations::default()),
        })
    }
}

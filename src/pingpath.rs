//! Trace once, then ping every discovered hop
//!
//! The trace runs first and its records are forwarded as they arrive. Every
//! IPv4 address seen in the hop records is collected; once the trace ends and
//! a grace period has passed, the collected hops are resolved, deduplicated
//! and handed to the continuous ping scheduler.

use crate::dns::is_ipv4_literal;
use crate::ping::scheduler::PingEvent;
use crate::ping::{plan_targets, PingPlan};
use crate::session::{pause, OperationScope, Session, EVENT_CHANNEL_CAPACITY};
use crate::trace::{TraceConfig, TraceEvent, REQUEST_TIMED_OUT};
use serde::Serialize;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Live output of a ping-path operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "event", rename_all = "snake_case")]
pub enum PingPathEvent {
    /// Forwarded from the trace phase
    Trace(TraceEvent),
    /// The hops that are about to be pinged
    Plan(PingPlan),
    /// Forwarded from the ping phase
    Ping(PingEvent),
}

/// Every IPv4 literal in `text`, in order of appearance
///
/// The text is split on every character that cannot be part of a dotted
/// quad and each piece is parsed on its own.
pub fn extract_ipv4s(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| token.parse::<Ipv4Addr>().is_ok())
        .map(str::to_string)
        .collect()
}

/// Drop the timeout placeholder and repeated entries, keeping first occurrences
pub fn filter_hop_list(hops: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hops.into_iter()
        .filter(|hop| hop != REQUEST_TIMED_OUT && seen.insert(hop.clone()))
        .collect()
}

/// The trace-then-ping orchestrator
pub struct PingPath {
    session: Session,
    config: TraceConfig,
}

impl PingPath {
    /// Create an orchestrator over `session`'s collaborators
    pub fn new(session: Session, config: TraceConfig) -> Self {
        Self { session, config }
    }

    /// Run both phases, sending events to `events`
    ///
    /// Returns once the ping phase ends (on cancellation), or early when the
    /// scope is cancelled during the trace, in which case no pinging starts.
    #[instrument(skip(self, scope, events))]
    pub async fn run(
        &self,
        scope: &OperationScope,
        destination: &str,
        events: mpsc::Sender<PingPathEvent>,
    ) {
        let cancel = scope.token();
        let Some(hops) = self.trace_phase(scope, destination, &events).await else {
            return;
        };
        info!(hops = hops.len(), "trace finished");

        if !pause(self.session.timing().pingpath_grace, cancel).await {
            return;
        }

        let resolutions = self.session.resolve_targets(&hops, cancel).await.dedup();
        if cancel.is_cancelled() {
            return;
        }
        let plan = plan_targets(&resolutions);
        let targets = plan.targets.clone();
        if !publish(&events, PingPathEvent::Plan(plan), cancel).await || targets.is_empty() {
            return;
        }

        let mut pings = self.session.start_ping(scope, targets);
        while let Some(event) = pings.recv().await {
            if !publish(&events, PingPathEvent::Ping(event), cancel).await {
                break;
            }
        }
        debug!("ping phase ended");
    }

    /// Trace `destination`, forwarding events and collecting hop addresses
    ///
    /// Returns `None` when cancelled.
    async fn trace_phase(
        &self,
        scope: &OperationScope,
        destination: &str,
        events: &mpsc::Sender<PingPathEvent>,
    ) -> Option<Vec<String>> {
        let mut trace = self
            .session
            .start_trace(scope, destination, self.config.clone());

        let mut hops = Vec::new();
        while let Some(event) = trace.recv().await {
            if let TraceEvent::Hop(record) = &event {
                let line = record.to_fields().join(" ");
                hops.extend(extract_ipv4s(&line));
            }
            if !publish(events, PingPathEvent::Trace(event), scope.token()).await {
                return None;
            }
        }

        if scope.is_cancelled() {
            debug!("cancelled during trace, discarding hops");
            return None;
        }
        Some(
            filter_hop_list(hops)
                .into_iter()
                .filter(|hop| is_ipv4_literal(hop))
                .collect(),
        )
    }
}

/// Send unless cancelled first or the receiver is gone
async fn publish(
    events: &mpsc::Sender<PingPathEvent>,
    event: PingPathEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

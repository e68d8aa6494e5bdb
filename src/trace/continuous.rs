//! Repeating tracer for continuous traceroute

use super::engine::{publish, HopTracer, TraceOutcome};
use super::types::TraceEvent;
use crate::session::pause;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs a [`HopTracer`] over and over until cancelled
pub struct RepeatingTracer {
    tracer: HopTracer,
    delay: Duration,
}

impl RepeatingTracer {
    /// Repeat `tracer` with `delay` between the end of one run and the next
    pub fn new(tracer: HopTracer, delay: Duration) -> Self {
        Self { tracer, delay }
    }

    /// Trace until `cancel` fires, returning the number of completed runs
    ///
    /// Each run ends with [`TraceEvent::RunFinished`], including runs that
    /// stopped on a diagnostic.
    pub async fn run(
        &self,
        destination: &str,
        events: &mpsc::Sender<TraceEvent>,
        cancel: &CancellationToken,
    ) -> u64 {
        let mut run = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if self.tracer.run(destination, events, cancel).await == TraceOutcome::Cancelled {
                break;
            }
            run += 1;
            info!(run, destination, "trace run finished");
            if !publish(events, TraceEvent::RunFinished { run }, cancel).await {
                break;
            }

            if !pause(self.delay, cancel).await {
                break;
            }
        }
        debug!(runs = run, "repeating tracer stopped");
        run
    }
}

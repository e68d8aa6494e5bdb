//! Continuous ping scheduler
//!
//! Every target gets its own probe loop. Loops take turns through a
//! [`TurnPool`] holding exactly one token per target; tokens are stamped with
//! the round they belong to, so a loop cannot start round `k + 1` until every
//! loop has been granted round `k`. A slow or unreachable target therefore
//! holds the others back by at most one round instead of starving them.

use super::{PingTarget, Prober};
use crate::config::TimingConfig;
use crate::probe::{ProbeResult, RttClass};
use crate::session::{pause, OperationScope};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// One probe result, positioned in its target's rolling window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingSample {
    /// Index of the target in the list handed to the scheduler
    pub target: usize,
    /// Column within the rolling window, `0..columns`
    pub column: usize,
    /// Display bucket for the RTT
    pub class: RttClass,
    /// Raw probe result
    pub result: ProbeResult,
}

/// Live output of the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PingEvent {
    /// A probe completed
    Sample(PingSample),
    /// The target's window filled up and starts again at column 0
    WindowCleared {
        /// Index of the target
        target: usize,
    },
}

#[derive(Debug)]
struct PoolState {
    available: usize,
    round: u64,
    issued: usize,
    size: usize,
}

/// Fixed-size pool of round-stamped turn tokens
#[derive(Debug)]
pub struct TurnPool {
    state: Mutex<PoolState>,
    changed: Notify,
}

impl TurnPool {
    /// A pool pre-loaded with `size` tokens
    pub fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                available: size,
                round: 0,
                issued: 0,
                size,
            }),
            changed: Notify::new(),
        }
    }

    /// Wait for a token in `round`
    ///
    /// Each caller asks for rounds 0, 1, 2, ... in turn; the pool only moves
    /// to the next round once every token of the current one was granted.
    pub async fn acquire(self: &Arc<Self>, round: u64) -> Turn {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.round == round && state.available > 0 {
                    state.available -= 1;
                    state.issued += 1;
                    if state.issued == state.size {
                        state.round += 1;
                        state.issued = 0;
                        drop(state);
                        self.changed.notify_waiters();
                    }
                    return Turn {
                        pool: Arc::clone(self),
                    };
                }
            }

            notified.await;
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.available += 1;
        }
        self.changed.notify_waiters();
    }
}

/// A granted turn; the token goes back to the pool on drop
#[derive(Debug)]
pub struct Turn {
    pool: Arc<TurnPool>,
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// Runs one probe loop per target until cancelled
pub struct ContinuousPing {
    prober: Arc<dyn Prober>,
    timing: TimingConfig,
}

impl ContinuousPing {
    /// Create a scheduler using `prober` for every echo exchange
    pub fn new(prober: Arc<dyn Prober>, timing: TimingConfig) -> Self {
        Self { prober, timing }
    }

    /// Spawn the probe loops on `scope` and return immediately
    ///
    /// Events go to `events`; the channel closes once every loop has stopped.
    pub fn start(
        &self,
        scope: &OperationScope,
        targets: Vec<PingTarget>,
        events: mpsc::Sender<PingEvent>,
    ) {
        debug!(targets = targets.len(), "starting continuous ping");
        let pool = Arc::new(TurnPool::new(targets.len()));

        for (index, target) in targets.into_iter().enumerate() {
            let probe_loop = ProbeLoop {
                index,
                target,
                prober: Arc::clone(&self.prober),
                pool: Arc::clone(&pool),
                timing: self.timing.clone(),
                events: events.clone(),
                cancel: scope.token().clone(),
            };
            scope.spawn(probe_loop.run());
        }
    }
}

struct ProbeLoop {
    index: usize,
    target: PingTarget,
    prober: Arc<dyn Prober>,
    pool: Arc<TurnPool>,
    timing: TimingConfig,
    events: mpsc::Sender<PingEvent>,
    cancel: CancellationToken,
}

impl ProbeLoop {
    /// Deliver an event unless cancelled or nobody is listening
    async fn publish(&self, event: PingEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    #[instrument(skip_all, fields(target = %self.target.address))]
    async fn run(self) {
        let interval = self.timing.ping_interval;
        let columns = self.timing.ping_columns.max(1);
        let mut column = 0;
        let mut round = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let turn = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                turn = self.pool.acquire(round) => turn,
            };
            round += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.prober.probe(&self.target.address) => result,
            };
            let class = result.class();
            trace!(round, column, %class, "probe finished");

            let sample = PingSample {
                target: self.index,
                column,
                class,
                result,
            };
            if !self.publish(PingEvent::Sample(sample)).await {
                break;
            }

            column += 1;
            if column == columns {
                if !pause(interval, &self.cancel).await {
                    break;
                }
                if !self.publish(PingEvent::WindowCleared { target: self.index }).await {
                    break;
                }
                column = 0;
            }

            if !pause(interval, &self.cancel).await {
                break;
            }
            drop(turn);
        }
        debug!("probe loop stopped");
    }
}

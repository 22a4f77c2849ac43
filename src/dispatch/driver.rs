//! # Ordered chain driver.
//!
//! A single task owns every [`OrderedChain`]: the FIFO of pending chains and
//! the one active chain. All chain transitions happen on this task, so at most
//! one receiver anywhere is ever receiving an ordered delivery.
//!
//! ## Loop
//! ```text
//! loop {
//!   select (biased):
//!     ├─ cancelled               → exit
//!     ├─ command                 → Enqueue / Finish / Release / ActiveReceiverOf
//!     └─ sleep_until(next wake)  → sweep:
//!                                   ├─ watchdog expired  → WatchdogFired, finalize
//!                                   └─ receiver deadline → ReceiverTimedOut, advance
//! }
//! ```
//!
//! ## Advancing
//! ```text
//! next_step
//!   ├─ Finalize(reason) → notify final receiver once → ChainFinished → start next pending
//!   └─ Deliver(receiver)
//!        ├─ gone              → Skipped, continue
//!        ├─ frozen            → Skipped + captured, continue
//!        ├─ hand-off failed   → Skipped + DeliveryFailed, continue
//!        └─ hand-off ok       → Received, park
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::{BrokerEvent, BrokerEventKind};
use crate::model::SubscriberId;

use super::chain::{ChainSnapshot, FinishReason, OrderedChain, Outcome, Step};
use super::shared::{Admission, Shared};

/// Requests handled by the driver task.
pub(crate) enum Command {
    Enqueue(OrderedChain),
    Finish {
        receiver: SubscriberId,
        code: i32,
        data: String,
        abort: bool,
        reply: oneshot::Sender<Outcome>,
    },
    /// Finishes `receiver` with the chain's own result if the active chain is parked on it.
    Release {
        receiver: SubscriberId,
        reply: oneshot::Sender<bool>,
    },
    ActiveReceiverOf {
        receiver: SubscriberId,
        reply: oneshot::Sender<Option<ChainSnapshot>>,
    },
}

enum Wake {
    Cancelled,
    Command(Option<Command>),
    Deadline,
}

pub(crate) struct ChainDriver {
    shared: Arc<Shared>,
    pending: VecDeque<OrderedChain>,
    active: Option<OrderedChain>,
}

impl ChainDriver {
    /// Spawns the driver task and returns its command channel.
    pub fn spawn(
        shared: Arc<Shared>,
        token: CancellationToken,
    ) -> (mpsc::UnboundedSender<Command>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Self {
            shared,
            pending: VecDeque::new(),
            active: None,
        };
        (tx, tokio::spawn(driver.run(rx, token)))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, token: CancellationToken) {
        loop {
            let deadline = self.next_wake();
            let wake = tokio::select! {
                biased;
                _ = token.cancelled() => Wake::Cancelled,
                cmd = rx.recv() => Wake::Command(cmd),
                _ = sleep_until(deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Cancelled | Wake::Command(None) => break,
                Wake::Command(Some(cmd)) => self.handle(cmd).await,
                Wake::Deadline => self.sweep().await,
            }
        }
        debug!(
            pending = self.pending.len(),
            active = self.active.is_some(),
            "chain driver stopped"
        );
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(chain) => {
                self.pending.push_back(chain);
                self.pump().await;
            }
            Command::Finish {
                receiver,
                code,
                data,
                abort,
                reply,
            } => {
                let outcome = match self.active.as_mut() {
                    Some(chain) => chain.finish(receiver, code, data, abort),
                    None => Outcome::Stale,
                };
                let _ = reply.send(outcome);
                if outcome == Outcome::Accepted {
                    debug!(subscriber = %receiver, abort, "receiver finished");
                    self.pump().await;
                }
            }
            Command::Release { receiver, reply } => {
                let released = match self.active.as_mut() {
                    Some(chain) if chain.awaiting() == Some(receiver) => chain.release().is_some(),
                    _ => false,
                };
                let _ = reply.send(released);
                if released {
                    debug!(subscriber = %receiver, "parked receiver released");
                    self.pump().await;
                }
            }
            Command::ActiveReceiverOf { receiver, reply } => {
                let snapshot = self
                    .active
                    .as_ref()
                    .filter(|chain| chain.awaiting() == Some(receiver))
                    .map(OrderedChain::snapshot);
                let _ = reply.send(snapshot);
            }
        }
    }

    /// Earliest instant at which the active chain needs attention.
    fn next_wake(&self) -> Option<Instant> {
        let chain = self.active.as_ref()?;
        match (chain.receiver_deadline(), chain.watchdog_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn sweep(&mut self) {
        let now = Instant::now();
        let Some(chain) = self.active.as_mut() else {
            return;
        };

        if chain.watchdog_deadline().is_some_and(|d| now >= d) {
            let receiver = chain.expire_chain();
            warn!(
                event = chain.event().name(),
                chain = %chain.id(),
                budget_ms = chain.watchdog_budget().as_millis() as u64,
                "chain watchdog fired"
            );
            let mut rec = BrokerEvent::new(BrokerEventKind::WatchdogFired)
                .with_event(chain.event().name_arc())
                .with_chain(chain.id())
                .with_timeout(chain.watchdog_budget());
            if let Some(receiver) = receiver {
                rec = rec.with_subscriber(receiver);
            }
            self.shared.publish(rec);
        } else if chain.receiver_deadline().is_some_and(|d| now >= d) {
            if let Some(receiver) = chain.expire_receiver() {
                warn!(
                    event = chain.event().name(),
                    chain = %chain.id(),
                    subscriber = %receiver,
                    "receiver timed out"
                );
                self.shared.publish(
                    BrokerEvent::new(BrokerEventKind::ReceiverTimedOut)
                        .with_event(chain.event().name_arc())
                        .with_chain(chain.id())
                        .with_subscriber(receiver)
                        .with_timeout(chain.receiver_timeout()),
                );
            }
        } else {
            return;
        }
        self.pump().await;
    }

    /// Drives chains until the active one parks or none is left.
    async fn pump(&mut self) {
        loop {
            if self.active.is_none() {
                let Some(mut next) = self.pending.pop_front() else {
                    return;
                };
                next.start(Instant::now());
                debug!(
                    event = next.event().name(),
                    chain = %next.id(),
                    receivers = next.receivers().len(),
                    "chain started"
                );
                self.shared.publish(
                    BrokerEvent::new(BrokerEventKind::ChainStarted)
                        .with_event(next.event().name_arc())
                        .with_chain(next.id())
                        .with_count(next.receivers().len()),
                );
                self.active = Some(next);
            }

            let Some(chain) = self.active.as_mut() else {
                return;
            };
            if chain.awaiting().is_some() {
                return;
            }

            match chain.next_step(Instant::now()) {
                Step::Finalize(reason) => {
                    if let Some(done) = self.active.take() {
                        self.finalize(done, reason).await;
                    }
                }
                Step::Deliver { index, receiver } => {
                    let sub = match self.shared.admit(receiver, chain.event(), Some(chain.id())) {
                        Admission::Ready(sub) => sub,
                        Admission::Gone | Admission::Frozen => {
                            chain.skip();
                            continue;
                        }
                    };

                    chain.begin_receiving(Instant::now());
                    match self
                        .shared
                        .handoff(sub.receiver.as_ref(), chain.event(), chain.delivery())
                        .await
                    {
                        Ok(()) => {
                            chain.handed_off();
                            debug!(
                                chain = %chain.id(),
                                subscriber = %receiver,
                                index,
                                "receiver parked"
                            );
                            return;
                        }
                        Err(err) => {
                            self.shared
                                .delivery_failed(&sub, chain.event(), Some(chain.id()), &err);
                            chain.skip();
                        }
                    }
                }
            }
        }
    }

    async fn finalize(&self, mut chain: OrderedChain, reason: FinishReason) {
        if let Some(receiver) = chain.take_final_receiver() {
            if let Err(err) = self
                .shared
                .handoff(receiver.as_ref(), chain.event(), chain.delivery())
                .await
            {
                warn!(
                    event = chain.event().name(),
                    chain = %chain.id(),
                    receiver = receiver.name(),
                    error = err.as_label(),
                    "final receiver hand-off failed"
                );
                self.shared.publish(
                    BrokerEvent::new(BrokerEventKind::DeliveryFailed)
                        .with_event(chain.event().name_arc())
                        .with_chain(chain.id())
                        .with_reason(err.to_string()),
                );
            }
        }

        debug!(
            event = chain.event().name(),
            chain = %chain.id(),
            delivered = chain.delivered(),
            reason = reason.as_label(),
            "chain finished"
        );
        self.shared.publish(
            BrokerEvent::new(BrokerEventKind::ChainFinished)
                .with_event(chain.event().name_arc())
                .with_chain(chain.id())
                .with_count(chain.delivered())
                .with_reason(reason.as_label()),
        );
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

//! # Ordered chain state machine.
//!
//! One [`OrderedChain`] is the state of one ordered publish. It is pure data:
//! the chain driver performs every hand-off and feeds the results back.
//!
//! ## States
//! ```text
//!            next_step → Deliver          handed_off             finish (Accepted)
//!   Idle ──────────────────────► Receiving ─────────► Received ───────────────────► Idle
//!    │  ▲                            │                   │
//!    │  │ skip (frozen/gone/failed)  │                   │ expire_receiver (deadline)
//!    │  └────────────────────────────┘                   └─────────────────────────► Idle
//!    │
//!    └── next_step → Finalize (cursor exhausted / abort / watchdog) ──► terminal
//! ```
//!
//! ## Rules
//! - The receiver snapshot is fixed at construction.
//! - Each [`DeliveryState`] leaves `Pending` at most once.
//! - A finish is accepted only from the current receiver while `Received`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::collab::{Delivery, Notify};
use crate::model::{ChainId, CommonEvent, SubscriberId};

/// Per-receiver delivery outcome within one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    /// The receiver acknowledged with a finish.
    Delivered,
    /// Frozen, gone, or the hand-off failed.
    Skipped,
    /// The receiver did not finish before its deadline.
    Timeout,
}

/// Position of the chain relative to its current receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Between receivers.
    Idle,
    /// Hand-off to the current receiver in progress.
    Receiving,
    /// Handed off; waiting for the receiver's finish or its deadline.
    Received,
}

/// Result of a finish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The finish was applied and the chain advanced.
    Accepted,
    /// The caller is not the receiver the chain is waiting on; ignored.
    Stale,
}

/// Why a chain reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every receiver was visited.
    Exhausted,
    /// A receiver set the abort flag.
    Aborted,
    /// The whole-chain watchdog expired.
    Watchdog,
}

impl FinishReason {
    pub fn as_label(self) -> &'static str {
        match self {
            FinishReason::Exhausted => "exhausted",
            FinishReason::Aborted => "aborted",
            FinishReason::Watchdog => "watchdog",
        }
    }
}

/// Next thing the driver has to do for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Deliver { index: usize, receiver: SubscriberId },
    Finalize(FinishReason),
}

/// Read-only view of an active chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub id: ChainId,
    pub event: CommonEvent,
    /// Index of the current receiver in the snapshot.
    pub index: Option<usize>,
    pub receiver: Option<SubscriberId>,
    pub state: ChainState,
    pub deliveries: Vec<DeliveryState>,
}

/// State of one in-flight ordered publish.
pub struct OrderedChain {
    id: ChainId,
    event: CommonEvent,
    delivery: Delivery,
    receivers: Vec<SubscriberId>,
    deliveries: Vec<DeliveryState>,
    cursor: usize,
    current: Option<usize>,
    state: ChainState,
    abort: bool,
    expired: bool,
    receiver_timeout: Duration,
    watchdog_budget: Duration,
    dispatched_at: Option<Instant>,
    receiver_started_at: Option<Instant>,
    final_receiver: Option<Arc<dyn Notify>>,
}

impl OrderedChain {
    pub fn new(
        id: ChainId,
        event: CommonEvent,
        delivery: Delivery,
        receivers: Vec<SubscriberId>,
        receiver_timeout: Duration,
        watchdog_budget: Duration,
    ) -> Self {
        let deliveries = vec![DeliveryState::Pending; receivers.len()];
        Self {
            id,
            event,
            delivery: Delivery::ORDERED.with_sticky(delivery.sticky),
            receivers,
            deliveries,
            cursor: 0,
            current: None,
            state: ChainState::Idle,
            abort: false,
            expired: false,
            receiver_timeout,
            watchdog_budget,
            dispatched_at: None,
            receiver_started_at: None,
            final_receiver: None,
        }
    }

    /// Registers the receiver notified once when the chain finalizes.
    pub fn with_final_receiver(mut self, receiver: Arc<dyn Notify>) -> Self {
        self.final_receiver = Some(receiver);
        self
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn event(&self) -> &CommonEvent {
        &self.event
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn receivers(&self) -> &[SubscriberId] {
        &self.receivers
    }

    pub fn deliveries(&self) -> &[DeliveryState] {
        &self.deliveries
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn delivered(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|s| matches!(s, DeliveryState::Delivered))
            .count()
    }

    /// Marks the start of dispatch (the chain became the active chain).
    pub fn start(&mut self, now: Instant) {
        self.dispatched_at.get_or_insert(now);
    }

    /// Advances the cursor and decides what happens next.
    pub fn next_step(&mut self, now: Instant) -> Step {
        self.current = None;
        self.state = ChainState::Idle;

        if self.abort {
            return Step::Finalize(FinishReason::Aborted);
        }
        if self.expired || self.watchdog_deadline().is_some_and(|d| now >= d) {
            self.expired = true;
            return Step::Finalize(FinishReason::Watchdog);
        }

        let index = self.cursor;
        self.cursor += 1;
        match self.receivers.get(index) {
            Some(&receiver) => {
                self.current = Some(index);
                Step::Deliver { index, receiver }
            }
            None => Step::Finalize(FinishReason::Exhausted),
        }
    }

    /// Records the current receiver as skipped; the chain returns to `Idle`.
    pub fn skip(&mut self) {
        if let Some(i) = self.current.take() {
            self.settle(i, DeliveryState::Skipped);
        }
        self.state = ChainState::Idle;
    }

    /// The hand-off to the current receiver begins; its deadline starts now.
    pub fn begin_receiving(&mut self, now: Instant) {
        self.state = ChainState::Receiving;
        self.receiver_started_at = Some(now);
    }

    /// The hand-off succeeded; wait for the receiver to finish.
    pub fn handed_off(&mut self) {
        if self.state == ChainState::Receiving {
            self.state = ChainState::Received;
        }
    }

    /// The receiver the chain is currently parked on, if any.
    pub fn awaiting(&self) -> Option<SubscriberId> {
        if self.state != ChainState::Received {
            return None;
        }
        self.current.map(|i| self.receivers[i])
    }

    /// Applies a finish from `receiver`.
    ///
    /// Only the current receiver, while `Received`, is accepted. On acceptance
    /// the result pair and abort flag are stored and the chain returns to `Idle`.
    pub fn finish(
        &mut self,
        receiver: SubscriberId,
        code: i32,
        data: String,
        abort: bool,
    ) -> Outcome {
        if self.awaiting() != Some(receiver) {
            return Outcome::Stale;
        }
        self.event.set_result(code, data);
        self.abort = abort;
        if let Some(i) = self.current.take() {
            self.settle(i, DeliveryState::Delivered);
        }
        self.state = ChainState::Idle;
        self.receiver_started_at = None;
        Outcome::Accepted
    }

    /// Finishes the current receiver with the chain's own result and abort flag.
    pub fn release(&mut self) -> Option<SubscriberId> {
        let receiver = self.awaiting()?;
        let (code, data, abort) = (self.event.code(), self.event.data().to_string(), self.abort);
        self.finish(receiver, code, data, abort);
        Some(receiver)
    }

    /// Times out the current receiver: the chain keeps its result and abort
    /// flag, the receiver is recorded as `Timeout`.
    pub fn expire_receiver(&mut self) -> Option<SubscriberId> {
        let receiver = self.awaiting()?;
        if let Some(i) = self.current.take() {
            self.settle(i, DeliveryState::Timeout);
        }
        self.state = ChainState::Idle;
        self.receiver_started_at = None;
        Some(receiver)
    }

    /// Force-expires the whole chain; the next step finalizes.
    pub fn expire_chain(&mut self) -> Option<SubscriberId> {
        self.expired = true;
        self.expire_receiver()
    }

    /// Deadline of the current receiver, while parked.
    pub fn receiver_deadline(&self) -> Option<Instant> {
        if self.state != ChainState::Received {
            return None;
        }
        self.receiver_started_at.map(|t| t + self.receiver_timeout)
    }

    /// Instant after which the watchdog force-finalizes the chain.
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.dispatched_at.map(|t| t + self.watchdog_budget)
    }

    pub fn watchdog_budget(&self) -> Duration {
        self.watchdog_budget
    }

    pub fn receiver_timeout(&self) -> Duration {
        self.receiver_timeout
    }

    pub(crate) fn take_final_receiver(&mut self) -> Option<Arc<dyn Notify>> {
        self.final_receiver.take()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            id: self.id,
            event: self.event.clone(),
            index: self.current,
            receiver: self.current.map(|i| self.receivers[i]),
            state: self.state,
            deliveries: self.deliveries.clone(),
        }
    }

    fn settle(&mut self, index: usize, outcome: DeliveryState) {
        if let Some(slot) = self.deliveries.get_mut(index) {
            if *slot == DeliveryState::Pending {
                *slot = outcome;
            }
        }
    }
}

impl fmt::Debug for OrderedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedChain")
            .field("id", &self.id)
            .field("event", &self.event.name())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("deliveries", &self.deliveries)
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn chain(n: u64) -> OrderedChain {
        let receivers = (1..=n).map(SubscriberId).collect::<Vec<_>>();
        let budget = TIMEOUT * 2 * (n.max(1) as u32);
        OrderedChain::new(
            ChainId(1),
            CommonEvent::new("x").with_code(0).with_data("init"),
            Delivery::UNORDERED,
            receivers,
            TIMEOUT,
            budget,
        )
    }

    fn park(c: &mut OrderedChain, now: Instant) -> SubscriberId {
        let Step::Deliver { receiver, .. } = c.next_step(now) else {
            panic!("expected a delivery");
        };
        c.begin_receiving(now);
        c.handed_off();
        receiver
    }

    #[test]
    fn delivery_flag_is_always_ordered() {
        assert!(chain(1).delivery().ordered);
    }

    #[test]
    fn walks_receivers_in_snapshot_order() {
        let now = Instant::now();
        let mut c = chain(2);
        c.start(now);

        let a = park(&mut c, now);
        assert_eq!(a, SubscriberId(1));
        assert_eq!(c.finish(a, 1, "from-a".into(), false), Outcome::Accepted);

        let b = park(&mut c, now);
        assert_eq!(b, SubscriberId(2));
        assert_eq!(c.event().data(), "from-a");
        assert_eq!(c.finish(b, 2, "from-b".into(), false), Outcome::Accepted);

        assert_eq!(c.next_step(now), Step::Finalize(FinishReason::Exhausted));
        assert_eq!(c.deliveries(), &[DeliveryState::Delivered; 2]);
        assert_eq!(c.event().code(), 2);
    }

    #[test]
    fn abort_finalizes_before_next_receiver() {
        let now = Instant::now();
        let mut c = chain(2);
        c.start(now);
        let a = park(&mut c, now);
        c.finish(a, 0, String::new(), true);

        assert_eq!(c.next_step(now), Step::Finalize(FinishReason::Aborted));
        assert_eq!(c.deliveries()[1], DeliveryState::Pending);
    }

    #[test]
    fn stale_finishes_are_ignored() {
        let now = Instant::now();
        let mut c = chain(2);
        c.start(now);

        // nothing parked yet
        assert_eq!(c.finish(SubscriberId(1), 0, String::new(), false), Outcome::Stale);

        let a = park(&mut c, now);
        // wrong party
        assert_eq!(c.finish(SubscriberId(2), 0, String::new(), false), Outcome::Stale);
        assert_eq!(c.finish(a, 0, String::new(), false), Outcome::Accepted);
        // duplicate
        assert_eq!(c.finish(a, 0, String::new(), false), Outcome::Stale);
    }

    #[test]
    fn finish_during_hand_off_is_stale() {
        let now = Instant::now();
        let mut c = chain(1);
        c.start(now);
        let Step::Deliver { receiver, .. } = c.next_step(now) else {
            panic!("expected a delivery");
        };
        c.begin_receiving(now);
        assert_eq!(c.state(), ChainState::Receiving);
        assert_eq!(c.finish(receiver, 0, String::new(), false), Outcome::Stale);
    }

    #[test]
    fn timeout_keeps_result_and_marks_receiver() {
        let now = Instant::now();
        let mut c = chain(2);
        c.start(now);
        let a = park(&mut c, now);
        assert_eq!(c.receiver_deadline(), Some(now + TIMEOUT));

        assert_eq!(c.expire_receiver(), Some(a));
        assert_eq!(c.deliveries()[0], DeliveryState::Timeout);
        assert_eq!(c.event().data(), "init");
        // a late finish after the timeout is stale
        assert_eq!(c.finish(a, 9, "late".into(), false), Outcome::Stale);
        assert_eq!(c.deliveries()[0], DeliveryState::Timeout);
    }

    #[test]
    fn skipped_receivers_do_not_block() {
        let now = Instant::now();
        let mut c = chain(2);
        c.start(now);
        assert!(matches!(c.next_step(now), Step::Deliver { index: 0, .. }));
        c.skip();
        assert!(matches!(c.next_step(now), Step::Deliver { index: 1, .. }));
        assert_eq!(c.deliveries()[0], DeliveryState::Skipped);
    }

    #[test]
    fn watchdog_finalizes_after_budget() {
        let now = Instant::now();
        let mut c = chain(1);
        c.start(now);
        park(&mut c, now);
        assert_eq!(c.watchdog_deadline(), Some(now + TIMEOUT * 2));

        let late = now + TIMEOUT * 2;
        c.expire_chain();
        assert_eq!(c.next_step(late), Step::Finalize(FinishReason::Watchdog));
        assert_eq!(c.deliveries()[0], DeliveryState::Timeout);
    }

    #[test]
    fn release_finishes_with_chain_result() {
        let now = Instant::now();
        let mut c = chain(1);
        c.start(now);
        let a = park(&mut c, now);
        assert_eq!(c.release(), Some(a));
        assert_eq!(c.deliveries()[0], DeliveryState::Delivered);
        assert_eq!(c.event().data(), "init");
        assert_eq!(c.release(), None);
    }
}

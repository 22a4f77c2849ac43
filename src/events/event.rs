//! # Runtime records emitted by the broker.
//!
//! [`BrokerEventKind`] classifies what happened inside the broker:
//! - **Registry**: subscriptions added/removed/rejected, owners evicted
//! - **Publish**: admitted, rejected, permission-filtered
//! - **Delivery**: hand-off failures, receiver timeouts, chain lifecycle
//! - **Freeze**: captures, flushes, freeze-state updates
//! - **Plumbing**: queue and observer overflow, observer panics
//!
//! The [`BrokerEvent`] struct carries optional metadata (event name,
//! subscriber, pid, chain, count, reason) set depending on the kind.
//!
//! ## Ordering guarantees
//! Each record has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the order when records are delivered
//! out of order.
//!
//! ## Example
//! ```rust
//! use commonevents::{BrokerEvent, BrokerEventKind};
//!
//! let ev = BrokerEvent::new(BrokerEventKind::OwnerEvicted)
//!     .with_pid(42)
//!     .with_count(300)
//!     .with_reason("subscription ceiling");
//!
//! assert_eq!(ev.kind, BrokerEventKind::OwnerEvicted);
//! assert_eq!(ev.pid, Some(42));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::model::{ChainId, SubscriberId};

/// Global sequence counter for record ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of broker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEventKind {
    // === Registry ===
    /// A subscription was registered.
    ///
    /// Sets: `subscriber`, `pid`, `count` (live subscriptions after insert)
    SubscriberAdded,

    /// A subscription was removed (unsubscribe or owner death).
    ///
    /// Sets: `subscriber`, `pid`, `reason`
    SubscriberRemoved,

    /// A subscription was refused because the caller is the top offender.
    ///
    /// Sets: `pid`, `count`
    SubscribeRejected,

    /// The top offender was selected for termination.
    ///
    /// Sets: `pid`, `count`, `reason`
    OwnerEvicted,

    // === Publish ===
    /// A publish was admitted.
    ///
    /// Sets: `event`, `pid`, `count` (matched subscribers), `chain` (ordered only)
    EventPublished,

    /// A publish was refused at admission.
    ///
    /// Sets: `event`, `pid`, `reason`
    PublishRejected,

    /// Subscribers were excluded for permission reasons.
    ///
    /// Sets: `event`, `count` (excluded subscribers)
    PermissionDenied,

    // === Delivery ===
    /// A hand-off to one receiver failed; the receiver was skipped.
    ///
    /// Sets: `event`, `subscriber`, `reason`, `chain` (ordered only)
    DeliveryFailed,

    /// A receiver did not finish before its deadline.
    ///
    /// Sets: `event`, `subscriber`, `chain`, `timeout_ms`
    ReceiverTimedOut,

    /// An ordered chain became the active chain.
    ///
    /// Sets: `event`, `chain`, `count` (receivers)
    ChainStarted,

    /// An ordered chain reached its terminal state.
    ///
    /// Sets: `event`, `chain`, `count` (receivers delivered), `reason` (`aborted`/`exhausted`/`watchdog`)
    ChainFinished,

    /// The whole-chain watchdog force-finalized a chain.
    ///
    /// Sets: `event`, `chain`, `timeout_ms` (budget)
    WatchdogFired,

    // === Freeze ===
    /// An event was set aside for a frozen subscriber.
    ///
    /// Sets: `event`, `subscriber`
    EventFrozen,

    /// Frozen events were drained for replay.
    ///
    /// Sets: `count`
    FrozenFlushed,

    /// Freeze state of matching subscriptions changed.
    ///
    /// Sets: `count` (subscriptions updated), `reason` (`frozen`/`thawed`)
    FreezeUpdated,

    // === Plumbing ===
    /// A delivery queue was full; the work was refused.
    ///
    /// Sets: `reason` (queue name)
    QueueOverflow,

    /// An observer dropped a record (queue full or worker closed).
    ///
    /// Sets: `reason`
    ObserverOverflow,

    /// An observer panicked while processing a record.
    ///
    /// Sets: `reason`
    ObserverPanicked,
}

/// Broker record with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`BrokerEventKind`]
#[derive(Clone, Debug)]
pub struct BrokerEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Record classification.
    pub kind: BrokerEventKind,

    /// Name of the common event involved.
    pub event: Option<Arc<str>>,
    /// Subscription involved.
    pub subscriber: Option<SubscriberId>,
    /// Owning or publishing process.
    pub pid: Option<u32>,
    /// Ordered chain involved.
    pub chain: Option<ChainId>,
    /// Kind-specific count (matched, excluded, flushed, ...).
    pub count: Option<u32>,
    /// Deadline or budget in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl BrokerEvent {
    /// Creates a new record of the given kind with current timestamp and next sequence number.
    pub fn new(kind: BrokerEventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            event: None,
            subscriber: None,
            pid: None,
            chain: None,
            count: None,
            timeout_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_event(mut self, name: impl Into<Arc<str>>) -> Self {
        self.event = Some(name.into());
        self
    }

    #[inline]
    pub fn with_subscriber(mut self, id: SubscriberId) -> Self {
        self.subscriber = Some(id);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_chain(mut self, chain: ChainId) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Attaches a count (saturated to `u32`).
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a deadline (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates an observer overflow record.
    #[inline]
    pub fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        BrokerEvent::new(BrokerEventKind::ObserverOverflow)
            .with_reason(format!("observer={observer} reason={reason}"))
    }

    /// Creates an observer panic record.
    #[inline]
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        BrokerEvent::new(BrokerEventKind::ObserverPanicked)
            .with_reason(format!("observer={observer} info={info}"))
    }

    #[inline]
    pub fn is_observer_overflow(&self) -> bool {
        matches!(self.kind, BrokerEventKind::ObserverOverflow)
    }
}

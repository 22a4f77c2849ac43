//! # Broker configuration.
//!
//! Provides [`BrokerConfig`] centralized settings for the dispatch engine.
//!
//! ## Sentinel values
//! - `max_subscribers = 0` → unlimited (no eviction policy)
//! - `handoff_timeout = 0s` → hand-offs are awaited without a bound

use std::time::Duration;

/// Global configuration for one [`DispatchEngine`](crate::DispatchEngine).
///
/// ## Field semantics
/// - `max_subscribers`: global subscription ceiling (`0` = unlimited)
/// - `receiver_timeout`: per-receiver acknowledgement deadline in ordered chains
/// - `watchdog_factor`: multiplier for the whole-chain watchdog budget
/// - `freeze_retention`: sliding window for events held for frozen subscribers
/// - `queue_capacity`: bound of the fresh and replay delivery queues (min 1)
/// - `bus_capacity`: observability bus ring buffer size (min 1)
/// - `handoff_timeout`: bound on one `Notify::notify` call (`0s` = unbounded)
/// - `sticky_permission`: permission a publisher needs for sticky events
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Maximum number of live subscriptions across all processes.
    ///
    /// When reached, the owning process with the most subscriptions is either
    /// rejected (if it is the caller) or evicted.
    pub max_subscribers: usize,

    /// Deadline a receiver of an ordered chain has to call finish.
    pub receiver_timeout: Duration,

    /// Whole-chain watchdog multiplier.
    ///
    /// A chain is force-finalized once it has been dispatching for longer than
    /// `watchdog_factor × receiver_timeout × receivers`.
    pub watchdog_factor: u32,

    /// How long captured events are kept, relative to the newest capture of
    /// the same subscriber.
    pub freeze_retention: Duration,

    /// Capacity of each unordered delivery queue.
    pub queue_capacity: usize,

    /// Capacity of the observability bus.
    pub bus_capacity: usize,

    /// Bound on a single hand-off to a receiver transport.
    pub handoff_timeout: Duration,

    /// Permission required to publish sticky events (`None` = unrestricted).
    pub sticky_permission: Option<String>,
}

impl BrokerConfig {
    /// Returns the subscription ceiling as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → at most `n` live subscriptions before eviction kicks in
    #[inline]
    pub fn subscriber_ceiling(&self) -> Option<usize> {
        if self.max_subscribers == 0 {
            None
        } else {
            Some(self.max_subscribers)
        }
    }

    /// Returns the hand-off bound as an `Option`.
    #[inline]
    pub fn handoff_limit(&self) -> Option<Duration> {
        if self.handoff_timeout == Duration::ZERO {
            None
        } else {
            Some(self.handoff_timeout)
        }
    }

    /// Total time budget of a chain with `receivers` entries before the
    /// watchdog force-finalizes it.
    ///
    /// ```
    /// use std::time::Duration;
    /// use commonevents::BrokerConfig;
    ///
    /// let cfg = BrokerConfig::default();
    /// assert_eq!(cfg.watchdog_budget(3), Duration::from_secs(60));
    /// ```
    #[inline]
    pub fn watchdog_budget(&self, receivers: usize) -> Duration {
        let receivers = u32::try_from(receivers.max(1)).unwrap_or(u32::MAX);
        self.receiver_timeout
            .saturating_mul(self.watchdog_factor.max(1))
            .saturating_mul(receivers)
    }

    /// Returns a queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn queue_capacity_clamped(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for BrokerConfig {
    /// Default configuration:
    ///
    /// - `max_subscribers = 512`
    /// - `receiver_timeout = 10s`
    /// - `watchdog_factor = 2`
    /// - `freeze_retention = 500s`
    /// - `queue_capacity = 1024`, `bus_capacity = 1024`
    /// - `handoff_timeout = 5s`
    /// - `sticky_permission = "permission.COMMONEVENT_STICKY"`
    fn default() -> Self {
        Self {
            max_subscribers: 512,
            receiver_timeout: Duration::from_secs(10),
            watchdog_factor: 2,
            freeze_retention: Duration::from_secs(500),
            queue_capacity: 1024,
            bus_capacity: 1024,
            handoff_timeout: Duration::from_secs(5),
            sticky_permission: Some("permission.COMMONEVENT_STICKY".to_string()),
        }
    }
}

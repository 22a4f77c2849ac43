//! # LogWriter: renders broker records through `tracing`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  subscriber added subscriber=sub-3 pid=812 live=41
//! WARN  owner evicted pid=77 owned=300 reason="subscription ceiling"
//! WARN  receiver timed out event="usual.event.X" subscriber=sub-9 chain=chain-2 timeout_ms=10000
//! DEBUG chain finished event="usual.event.X" chain=chain-2 delivered=2 outcome="aborted"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{BrokerEvent, BrokerEventKind};
use crate::observers::Observe;

/// Record writer observer.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Observe for LogWriter {
    async fn on_event(&self, e: &BrokerEvent) {
        let event = e.event.as_deref().unwrap_or("-");
        let subscriber = e.subscriber.map(|s| s.to_string());
        let chain = e.chain.map(|c| c.to_string());
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            BrokerEventKind::SubscriberAdded => {
                info!(subscriber = ?subscriber, pid = ?e.pid, live = ?e.count, "subscriber added");
            }
            BrokerEventKind::SubscriberRemoved => {
                info!(subscriber = ?subscriber, pid = ?e.pid, reason, "subscriber removed");
            }
            BrokerEventKind::SubscribeRejected => {
                warn!(pid = ?e.pid, owned = ?e.count, "subscribe rejected");
            }
            BrokerEventKind::OwnerEvicted => {
                warn!(pid = ?e.pid, owned = ?e.count, reason, "owner evicted");
            }
            BrokerEventKind::EventPublished => {
                debug!(event, pid = ?e.pid, matched = ?e.count, chain = ?chain, "event published");
            }
            BrokerEventKind::PublishRejected => {
                warn!(event, pid = ?e.pid, reason, "publish rejected");
            }
            BrokerEventKind::PermissionDenied => {
                info!(event, excluded = ?e.count, "subscribers excluded by permission");
            }
            BrokerEventKind::DeliveryFailed => {
                warn!(event, subscriber = ?subscriber, chain = ?chain, reason, "delivery failed");
            }
            BrokerEventKind::ReceiverTimedOut => {
                warn!(event, subscriber = ?subscriber, chain = ?chain, timeout_ms = ?e.timeout_ms, "receiver timed out");
            }
            BrokerEventKind::ChainStarted => {
                debug!(event, chain = ?chain, receivers = ?e.count, "chain started");
            }
            BrokerEventKind::ChainFinished => {
                debug!(event, chain = ?chain, delivered = ?e.count, outcome = reason, "chain finished");
            }
            BrokerEventKind::WatchdogFired => {
                warn!(event, chain = ?chain, budget_ms = ?e.timeout_ms, "chain watchdog fired");
            }
            BrokerEventKind::EventFrozen => {
                debug!(event, subscriber = ?subscriber, "event held for frozen subscriber");
            }
            BrokerEventKind::FrozenFlushed => {
                info!(entries = ?e.count, "frozen events flushed");
            }
            BrokerEventKind::FreezeUpdated => {
                info!(updated = ?e.count, state = reason, "freeze state updated");
            }
            BrokerEventKind::QueueOverflow => {
                warn!(queue = reason, "delivery queue overflow");
            }
            BrokerEventKind::ObserverOverflow => {
                warn!(reason, "observer overflow");
            }
            BrokerEventKind::ObserverPanicked => {
                warn!(reason, "observer panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

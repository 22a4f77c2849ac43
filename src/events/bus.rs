//! # Observability bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking publishing of [`BrokerEvent`] records from the registry, the
//! delivery workers and the chain driver.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                  Subscriber (one):
//!   Registry     ──┐
//!   FreshQueue   ──┤
//!   ReplayQueue  ──┼────► Bus ───────► observer_listener ────► ObserverSet
//!   ChainDriver  ──┘  (broadcast chan)   (in DispatchEngine)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: a single ring buffer stores recent records for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: records are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::event::BrokerEvent;

/// Broadcast channel for broker records.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<BrokerEvent>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<BrokerEvent>(capacity);
        Self { tx }
    }

    /// Publishes a record to all active receivers.
    ///
    /// If there are no receivers, the record is dropped.
    pub fn publish(&self, ev: BrokerEvent) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent records.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.tx.subscribe()
    }
}

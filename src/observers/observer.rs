//! # Observer trait.
//!
//! Provides [`Observe`] an extension point for plugging custom record handlers
//! into the broker.
//!
//! Each observer gets:
//! - **Dedicated worker task** (runs independently)
//! - **Per-observer bounded queue** (capacity via [`Observe::queue_capacity`])
//! - **Panic isolation** (panics are caught and reported as `ObserverPanicked`)
//!
//! ## Rules
//! - A slow observer only affects its own queue.
//! - Queue overflow drops the record **for this observer only** and publishes
//!   `BrokerEventKind::ObserverOverflow`.
//! - Records are processed sequentially (FIFO) per observer.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use commonevents::{BrokerEvent, BrokerEventKind, Observe};
//!
//! struct EvictionAlerts;
//!
//! #[async_trait]
//! impl Observe for EvictionAlerts {
//!     async fn on_event(&self, ev: &BrokerEvent) {
//!         if matches!(ev.kind, BrokerEventKind::OwnerEvicted) {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "eviction-alerts" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::BrokerEvent;

/// Observer of broker records.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Processes a single record.
    ///
    /// Called from a dedicated worker task, never in the publisher context.
    async fn on_event(&self, event: &BrokerEvent);

    /// Returns the observer name used in overflow/panic records.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose - override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this observer.
    ///
    /// The runtime clamps capacity to a minimum of 1. Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}

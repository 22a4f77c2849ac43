//! Broker observability: record types and broadcast bus.
//!
//! This module groups the record **data model** and the **bus** used to
//! publish/subscribe to records emitted by the registry, delivery workers
//! and the ordered-chain driver.
//!
//! ## Contents
//! - [`BrokerEventKind`], [`BrokerEvent`] record classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `DispatchEngine` (admission, registry changes, freeze),
//!   delivery workers (hand-off failures), chain driver (timeouts, watchdog),
//!   `ObserverSet` workers (overflow/panic).
//! - **Consumers**: the engine's observer listener, which fans out to the
//!   [`ObserverSet`](crate::ObserverSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{BrokerEvent, BrokerEventKind};

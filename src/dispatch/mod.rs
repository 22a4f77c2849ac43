//! # Dispatch: unordered fan-out, the ordered-chain driver, freeze/replay.
//!
//! ## Architecture
//! ```text
//! DispatchEngine::publish(event, options, publisher)
//!     │ admission (name, privilege, sticky permission)
//!     │ SubscriberRegistry::matching → ranked snapshot
//!     │
//!     ├─ unordered ──► [fresh queue]  ──► worker ──► receiver.notify() × N
//!     │                                     └─ frozen → FreezeVault::capture
//!     │
//!     └─ ordered ────► [chain driver] ──► one active OrderedChain at a time
//!                                           ├─ hand-off → park until finish / deadline
//!                                           └─ watchdog → force-finalize
//!
//! DispatchEngine::flush_frozen(selector)
//!     └─ FreezeVault::flush ──► [replay queue] ──► worker ──► receiver.notify()
//! ```
//!
//! ## Rules
//! - Each queue processes its jobs one after another; the queues run concurrently.
//! - Receivers are resolved through the registry at delivery time: a receiver
//!   that was removed is skipped, a frozen one has the event captured instead.
//! - No registry or vault lock is held across an `.await`.

mod builder;
mod chain;
mod driver;
mod engine;
mod queue;
mod shared;

#[cfg(test)]
mod tests;

pub use builder::EngineBuilder;
pub use chain::{ChainSnapshot, ChainState, DeliveryState, FinishReason, Outcome};
pub use engine::{DispatchEngine, PublishReceipt};

use std::any::Any;

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

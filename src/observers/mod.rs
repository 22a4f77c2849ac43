//! # Observers of broker records.
//!
//! This module provides the [`Observe`] trait and a built-in [`LogWriter`]
//! for handling records broadcast through the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! DispatchEngine ── publish(BrokerEvent) ──► Bus ──► observer_listener
//!                                                        │
//!                                                        ▼
//!                                                   ObserverSet
//!                                         ┌──────────────┼──────────────┐
//!                                         ▼              ▼              ▼
//!                                     LogWriter       Metrics        Custom
//! ```

mod log;
mod observer;
mod set;

pub use log::LogWriter;
pub use observer::Observe;
pub use set::ObserverSet;

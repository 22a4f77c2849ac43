//! # Subscriber registry.
//!
//! Owns every live subscription, indexed by event name, and answers the
//! question "who receives this publish?".
//!
//! ## Architecture
//! ```text
//! subscribe(req) ──► ceiling check ──► arena[SubscriberId] + by_event[name] + per_pid[pid]
//!                        └─► top offender is caller → TooManySubscribers
//!                        └─► top offender is other  → Eviction{pid} (caller admitted)
//!
//! matching(event) ──► by_event[name] ──► MatchSkills ──► visibility ──► publisher pins
//!                                    ──► publish filters (AND/OR) ──► permissions
//!                                    ──► sort by priority desc (registration order on ties)
//! ```
//!
//! ## Rules
//! - Chains and queues hold [`SubscriberId`](crate::SubscriberId)s and resolve
//!   them here at the moment of use; an unsubscribed id simply resolves to nothing.
//! - Freeze state lives on the arena entry, not on the shared [`Subscriber`].
//! - Eviction selects exactly one owning process and never touches others.

mod matcher;
mod store;
mod subscriber;

pub(crate) use matcher::{PublishContext, Verdict};
pub use store::{Admitted, Eviction, MatchResult, Resolved, SubscriberRegistry};
pub use subscriber::{SubscribeRequest, Subscriber};

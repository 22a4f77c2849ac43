//! # Freeze vault.
//!
//! Holds events that could not be delivered because the receiving
//! subscriber's owning process is suspended. Entries are pruned by a sliding
//! time window (relative to the newest capture of the same subscriber), not
//! by count.
//!
//! ```text
//! publish ──► subscriber frozen? ──► capture(sub, event)  ─┐
//!                                                          ▼
//!                                              vault[sub] = [(ev, t), ...]
//!                                                          │
//! thaw(selector) ──► flush(selector) ──► replay queue ◄────┘   (always unordered)
//! ```

mod vault;

pub use vault::{FreezeVault, FrozenDelivery};

//! # Collaborators the broker consumes.
//!
//! The core owns no transport, identity, package or persistence code. It calls
//! into these narrow traits instead:
//!
//! | Concern | Trait | Default |
//! |---|---|---|
//! | Receiver transport | [`Notify`] | none |
//! | Permissions / privilege | [`PermissionOracle`] | [`AllowAll`] |
//! | Anti-abuse termination | [`ProcessKiller`] | [`LogOnlyKiller`] |
//! | uid → bundle lookup | [`BundleResolver`] | [`NoBundles`] |
//! | Sticky last-value cache | [`StickyStore`] | [`MemoryStickyStore`] |
//! | Manifest-declared subscribers | [`StaticSubscribers`] | [`NoStaticSubscribers`] |

mod lifecycle;
mod notify;
mod permission;
mod sticky;

pub use lifecycle::{BundleResolver, LogOnlyKiller, NoBundles, ProcessKiller};
pub use notify::{Delivery, Notify};
pub use permission::{AllowAll, EventPermission, PermissionOracle, PermissionRule};
pub use sticky::{
    MemoryStickyStore, NoStaticSubscribers, StaticSubscribers, StickyRecord, StickyStore,
};

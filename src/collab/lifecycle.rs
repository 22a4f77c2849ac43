//! # Process lifecycle and package lookups.

use tracing::warn;

/// Terminates a process selected by the anti-abuse eviction policy.
///
/// The broker removes the victim's subscriptions when the lifecycle layer
/// reports the death through
/// [`DispatchEngine::on_owner_died`](crate::DispatchEngine::on_owner_died).
pub trait ProcessKiller: Send + Sync + 'static {
    fn kill(&self, pid: u32, reason: &str);
}

/// Killer that only logs the decision.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyKiller;

impl ProcessKiller for LogOnlyKiller {
    fn kill(&self, pid: u32, reason: &str) {
        warn!(pid, reason, "process selected for termination");
    }
}

/// Resolves a uid to its bundle name.
///
/// Used for matching filters and logging only, never for security decisions.
pub trait BundleResolver: Send + Sync + 'static {
    fn bundle_name(&self, uid: u32) -> Option<String>;
}

/// Resolver that knows no bundles.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBundles;

impl BundleResolver for NoBundles {
    fn bundle_name(&self, _uid: u32) -> Option<String> {
        None
    }
}

//! # Sticky cache and static subscribers.
//!
//! Both are collaborator-owned state; the core only calls into them.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::model::{CommonEvent, OwnerInfo, PublishOptions};

/// A sticky value together with the publish that produced it.
///
/// Late subscribers are matched against the original publisher and options,
/// so pins, visibility and permissions apply exactly as for a live publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StickyRecord {
    pub event: CommonEvent,
    pub publisher: OwnerInfo,
    pub options: PublishOptions,
}

impl StickyRecord {
    pub fn new(event: CommonEvent, publisher: OwnerInfo, options: PublishOptions) -> Self {
        Self {
            event,
            publisher,
            options,
        }
    }
}

/// Last-value cache of sticky events, keyed by event name.
pub trait StickyStore: Send + Sync + 'static {
    /// Records `record` as the sticky value of its event name.
    fn put(&self, record: StickyRecord);

    /// Returns the sticky value recorded for `name`.
    fn get(&self, name: &str) -> Option<StickyRecord>;
}

/// In-memory last-write-wins [`StickyStore`].
#[derive(Debug, Default)]
pub struct MemoryStickyStore {
    records: Mutex<HashMap<String, StickyRecord>>,
}

impl MemoryStickyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StickyStore for MemoryStickyStore {
    fn put(&self, record: StickyRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.event.name().to_string(), record);
    }

    fn get(&self, name: &str) -> Option<StickyRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(name).cloned()
    }
}

/// Manifest-declared subscribers that are not live registrations.
///
/// Handed every admitted publish; decides on its own which declared receivers
/// are enabled and should be started.
pub trait StaticSubscribers: Send + Sync + 'static {
    fn publish(&self, event: &CommonEvent, publisher: &OwnerInfo, options: &PublishOptions);
}

/// No static subscribers are declared.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStaticSubscribers;

impl StaticSubscribers for NoStaticSubscribers {
    fn publish(&self, _event: &CommonEvent, _publisher: &OwnerInfo, _options: &PublishOptions) {}
}

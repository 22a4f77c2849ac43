use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{CommonEvent, ProcessSelector, SubscriberId};
use crate::registry::Subscriber;

/// One held event ready for replay.
#[derive(Debug, Clone)]
pub struct FrozenDelivery {
    pub subscriber: Arc<Subscriber>,
    /// Snapshot of the event as captured.
    pub event: CommonEvent,
    pub captured_at: Instant,
}

/// Queue of held events for one subscriber.
struct FrozenEntry {
    subscriber: Arc<Subscriber>,
    events: VecDeque<(CommonEvent, Instant)>,
}

impl FrozenEntry {
    fn prune(&mut self, retention: Duration) {
        let Some(&(_, newest)) = self.events.back() else {
            return;
        };
        while let Some(&(_, at)) = self.events.front() {
            if newest.saturating_duration_since(at) > retention {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-subscriber, time-bounded buffer of undelivered events.
pub struct FreezeVault {
    retention: Duration,
    entries: BTreeMap<SubscriberId, FrozenEntry>,
}

impl FreezeVault {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: BTreeMap::new(),
        }
    }

    /// Appends `event` to the subscriber's queue and drops entries older than
    /// the retention window relative to this capture.
    pub fn capture(&mut self, subscriber: &Arc<Subscriber>, event: CommonEvent, now: Instant) {
        let entry = self
            .entries
            .entry(subscriber.id)
            .or_insert_with(|| FrozenEntry {
                subscriber: Arc::clone(subscriber),
                events: VecDeque::new(),
            });
        entry.events.push_back((event, now));
        entry.prune(self.retention);
    }

    /// Drains every entry whose owner matches `selector`.
    ///
    /// Entries come back grouped by subscriber (registration order), FIFO within
    /// one subscriber. A second call returns nothing until new captures occur.
    pub fn flush(&mut self, selector: &ProcessSelector) -> Vec<FrozenDelivery> {
        let ids: Vec<SubscriberId> = self
            .entries
            .iter()
            .filter(|(_, e)| selector.matches(&e.subscriber.owner))
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::new();
        for id in ids {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            out.extend(entry.events.into_iter().map(|(event, at)| FrozenDelivery {
                subscriber: Arc::clone(&entry.subscriber),
                event,
                captured_at: at,
            }));
        }
        out
    }

    /// Puts drained entries back, ahead of anything captured since.
    ///
    /// Entries whose subscriber is no longer `live` are dropped, and every
    /// queue that grew is pruned against the retention window again.
    /// Returns the number of entries put back.
    pub fn restore<F>(&mut self, deliveries: Vec<FrozenDelivery>, live: F) -> usize
    where
        F: Fn(SubscriberId) -> bool,
    {
        let mut touched = BTreeSet::new();
        for d in deliveries.into_iter().rev() {
            if !live(d.subscriber.id) {
                continue;
            }
            touched.insert(d.subscriber.id);
            let entry = self
                .entries
                .entry(d.subscriber.id)
                .or_insert_with(|| FrozenEntry {
                    subscriber: Arc::clone(&d.subscriber),
                    events: VecDeque::new(),
                });
            entry.events.push_front((d.event, d.captured_at));
        }

        let mut restored = 0;
        for id in touched {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.prune(self.retention);
                restored += entry.events.len();
            }
        }
        restored
    }

    /// Drops everything held for `id`. Returns the number of events dropped.
    pub fn purge(&mut self, id: SubscriberId) -> usize {
        self.entries.remove(&id).map_or(0, |e| e.events.len())
    }

    /// Number of events held for `id`.
    pub fn pending_for(&self, id: SubscriberId) -> usize {
        self.entries.get(&id).map_or(0, |e| e.events.len())
    }

    /// Total number of held events.
    pub fn len(&self) -> usize {
        self.entries.values().map(|e| e.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

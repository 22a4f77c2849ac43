//! # Subscription store.
//!
//! [`SubscriberRegistry`] is plain data guarded by the engine's registry mutex:
//! every method runs in O(matching-set) without awaiting.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::time::Instant;

use crate::error::BrokerError;
use crate::model::{ProcessSelector, SubscriberId};

use super::matcher::{PublishContext, Verdict};
use super::{SubscribeRequest, Subscriber};

/// Arena entry: the shared record plus mutable freeze state.
struct Entry {
    subscriber: Arc<Subscriber>,
    frozen_at: Option<Instant>,
}

/// Owning process selected by the eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub pid: u32,
    /// Subscriptions the victim held when selected.
    pub count: usize,
}

/// A successful subscription.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub subscriber: Arc<Subscriber>,
    /// Set when the ceiling was reached and another process was selected for termination.
    pub evicted: Option<Eviction>,
}

/// Snapshot of the subscribers a publish reaches.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Ranked by priority (descending), registration order on ties.
    pub matched: Vec<Arc<Subscriber>>,
    /// Subscribers excluded because a permission check failed.
    pub denied: usize,
}

/// A subscription resolved at the moment of use.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub subscriber: Arc<Subscriber>,
    pub frozen: bool,
}

/// Registry of live subscriptions.
pub struct SubscriberRegistry {
    ceiling: Option<usize>,
    next_id: u64,
    subscribers: HashMap<SubscriberId, Entry>,
    by_event: HashMap<String, BTreeSet<SubscriberId>>,
    per_pid: BTreeMap<u32, usize>,
}

impl SubscriberRegistry {
    /// Creates an empty registry; `ceiling = None` disables eviction.
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            ceiling,
            next_id: 0,
            subscribers: HashMap::new(),
            by_event: HashMap::new(),
            per_pid: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Live subscriptions owned by `pid`.
    pub fn count_of(&self, pid: u32) -> usize {
        self.per_pid.get(&pid).copied().unwrap_or(0)
    }

    /// Registers a subscription.
    ///
    /// At the ceiling, the process with the most live subscriptions (lowest pid
    /// on ties) is found. If it is the caller, the request is rejected with
    /// [`BrokerError::TooManySubscribers`]; otherwise the caller is admitted and
    /// the victim is reported in [`Admitted::evicted`].
    pub fn subscribe(
        &mut self,
        req: SubscribeRequest,
        is_system: bool,
    ) -> Result<Admitted, BrokerError> {
        req.skills.validate()?;

        let mut evicted = None;
        if self.ceiling.is_some_and(|max| self.subscribers.len() >= max) {
            if let Some((pid, count)) = self.top_offender() {
                if pid == req.owner.pid {
                    return Err(BrokerError::TooManySubscribers { pid, count });
                }
                evicted = Some(Eviction { pid, count });
            }
        }

        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        let subscriber = Arc::new(Subscriber::from_request(id, req, is_system));

        for name in subscriber.skills.events() {
            self.by_event.entry(name.clone()).or_default().insert(id);
        }
        *self.per_pid.entry(subscriber.owner.pid).or_insert(0) += 1;
        self.subscribers.insert(
            id,
            Entry {
                subscriber: Arc::clone(&subscriber),
                frozen_at: None,
            },
        );

        Ok(Admitted { subscriber, evicted })
    }

    /// Removes a subscription from every index.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> Option<Arc<Subscriber>> {
        let entry = self.subscribers.remove(&id)?;
        let sub = entry.subscriber;

        for name in sub.skills.events() {
            if let Some(ids) = self.by_event.get_mut(name) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_event.remove(name);
                }
            }
        }
        if let Some(n) = self.per_pid.get_mut(&sub.owner.pid) {
            *n -= 1;
            if *n == 0 {
                self.per_pid.remove(&sub.owner.pid);
            }
        }
        Some(sub)
    }

    /// Removes every subscription owned by `pid`.
    pub fn remove_owner(&mut self, pid: u32) -> Vec<Arc<Subscriber>> {
        self.ids_of(pid)
            .into_iter()
            .filter_map(|id| self.unsubscribe(id))
            .collect()
    }

    /// Ids of the subscriptions owned by `pid`, in registration order.
    pub fn ids_of(&self, pid: u32) -> Vec<SubscriberId> {
        let mut ids: Vec<SubscriberId> = self
            .subscribers
            .values()
            .filter(|e| e.subscriber.owner.pid == pid)
            .map(|e| e.subscriber.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn resolve(&self, id: SubscriberId) -> Option<Resolved> {
        self.subscribers.get(&id).map(|e| Resolved {
            subscriber: Arc::clone(&e.subscriber),
            frozen: e.frozen_at.is_some(),
        })
    }

    /// When the subscription was frozen, if it is.
    pub fn frozen_at(&self, id: SubscriberId) -> Option<Instant> {
        self.subscribers.get(&id).and_then(|e| e.frozen_at)
    }

    /// Computes the ranked set of subscribers a publish reaches.
    pub(crate) fn matching(&self, ctx: &PublishContext<'_>) -> MatchResult {
        let Some(ids) = self.by_event.get(ctx.event.name()) else {
            return MatchResult::default();
        };

        let mut result = MatchResult::default();
        for id in ids {
            let Some(entry) = self.subscribers.get(id) else {
                continue;
            };
            match ctx.evaluate(&entry.subscriber) {
                Verdict::Deliver => result.matched.push(Arc::clone(&entry.subscriber)),
                Verdict::Denied => result.denied += 1,
                Verdict::Filtered => {}
            }
        }
        // ids iterate in registration order; a stable sort keeps it on ties
        result.matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        result
    }

    /// Sets or clears the freeze state of every subscription whose owner matches
    /// `selector`. Returns the number of subscriptions whose state changed.
    pub fn update_freeze(&mut self, selector: &ProcessSelector, frozen: bool, at: Instant) -> usize {
        let mut changed = 0;
        for entry in self.subscribers.values_mut() {
            if !selector.matches(&entry.subscriber.owner) {
                continue;
            }
            match (frozen, entry.frozen_at) {
                (true, None) => {
                    entry.frozen_at = Some(at);
                    changed += 1;
                }
                (false, Some(_)) => {
                    entry.frozen_at = None;
                    changed += 1;
                }
                _ => {}
            }
        }
        changed
    }

    /// Owning process with the most live subscriptions (lowest pid on ties).
    fn top_offender(&self) -> Option<(u32, usize)> {
        let mut top: Option<(u32, usize)> = None;
        for (&pid, &count) in &self.per_pid {
            if top.is_none_or(|(_, best)| count > best) {
                top = Some((pid, count));
            }
        }
        top
    }
}

//! # DispatchEngine: the broker's public surface.
//!
//! The engine validates and admits requests, takes the registry lock to
//! snapshot matches, then hands work to one of its three workers:
//!
//! - `fresh` queue: unordered publishes and sticky replays to new subscribers
//! - `replay` queue: frozen events flushed after a thaw
//! - chain driver: ordered publishes, finishes, timeouts
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio::sync::mpsc;
//! use commonevents::{
//!     CommonEvent, Delivery, DeliveryError, EngineBuilder, MatchSkills, Notify, OwnerInfo,
//!     PublishOptions, SubscribeRequest, UserScope,
//! };
//!
//! struct Forward(mpsc::UnboundedSender<CommonEvent>);
//!
//! #[async_trait]
//! impl Notify for Forward {
//!     async fn notify(&self, event: &CommonEvent, _d: Delivery) -> Result<(), DeliveryError> {
//!         self.0.send(event.clone()).map_err(|_| DeliveryError::Closed)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineBuilder::default().build();
//!
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     engine.subscribe(
//!         SubscribeRequest::new(
//!             MatchSkills::new(["usual.event.SCREEN_ON"]),
//!             OwnerInfo::new(812, 20010, "com.example.clock"),
//!             Arc::new(Forward(tx)),
//!         )
//!         .with_scope(UserScope::All),
//!     )?;
//!
//!     let receipt = engine.publish(
//!         CommonEvent::new("usual.event.SCREEN_ON"),
//!         &PublishOptions::unordered(),
//!         &OwnerInfo::new(1, 1000, "system"),
//!     )?;
//!     assert_eq!(receipt.matched, 1);
//!
//!     let got = rx.recv().await.expect("delivered");
//!     assert_eq!(got.name(), "usual.event.SCREEN_ON");
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::{Delivery, Notify, StickyRecord};
use crate::error::BrokerError;
use crate::events::{BrokerEvent, BrokerEventKind, Bus};
use crate::model::{ChainId, CommonEvent, OwnerInfo, ProcessSelector, PublishOptions, SubscriberId};
use crate::registry::{MatchResult, PublishContext, SubscribeRequest, Subscriber, Verdict};

use super::chain::{ChainSnapshot, OrderedChain, Outcome};
use super::driver::Command;
use super::queue::{DeliveryQueue, Job};
use super::shared::Shared;

/// Summary of an admitted publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Subscribers the publish was dispatched to.
    pub matched: usize,
    /// Subscribers excluded because a permission check failed.
    pub denied: usize,
    /// Chain created for an ordered publish.
    pub chain: Option<ChainId>,
}

/// Common-event broker: registry, unordered fan-out, ordered chains, freeze/replay.
///
/// Built by [`EngineBuilder`](crate::EngineBuilder); must live inside a tokio runtime.
pub struct DispatchEngine {
    shared: Arc<Shared>,
    fresh: DeliveryQueue,
    replay: DeliveryQueue,
    chains: mpsc::UnboundedSender<Command>,
    next_chain: AtomicU64,
    token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchEngine {
    pub(crate) fn new_internal(
        shared: Arc<Shared>,
        fresh: DeliveryQueue,
        replay: DeliveryQueue,
        chains: mpsc::UnboundedSender<Command>,
        token: CancellationToken,
        workers: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            shared,
            fresh,
            replay,
            chains,
            next_chain: AtomicU64::new(0),
            token,
            workers: Mutex::new(workers),
        }
    }

    /// Observability bus carrying [`BrokerEvent`] records.
    pub fn bus(&self) -> &Bus {
        &self.shared.bus
    }

    // === Registry ===

    /// Registers a subscription.
    ///
    /// At the subscription ceiling either the caller is rejected with
    /// [`BrokerError::TooManySubscribers`] (it owns the most subscriptions) or
    /// the top offender is handed to the process killer and the caller is
    /// admitted. A new subscription immediately receives the sticky events its
    /// filter matches.
    pub fn subscribe(&self, mut req: SubscribeRequest) -> Result<SubscriberId, BrokerError> {
        if self.token.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        self.shared.fill_bundle(&mut req.owner);
        let is_system = self.shared.oracle.is_privileged(req.owner.token);

        let (admitted, live) = {
            let mut registry = self.shared.registry();
            let admitted = registry.subscribe(req, is_system);
            (admitted, registry.len())
        };

        let admitted = match admitted {
            Ok(admitted) => admitted,
            Err(err) => {
                if let BrokerError::TooManySubscribers { pid, count } = err {
                    warn!(pid, count, "subscribe rejected: caller owns the most subscriptions");
                    self.shared.publish(
                        BrokerEvent::new(BrokerEventKind::SubscribeRejected)
                            .with_pid(pid)
                            .with_count(count),
                    );
                }
                return Err(err);
            }
        };

        if let Some(victim) = admitted.evicted {
            info!(pid = victim.pid, owned = victim.count, "evicting top subscriber owner");
            self.shared.killer.kill(victim.pid, "subscription ceiling");
            self.shared.publish(
                BrokerEvent::new(BrokerEventKind::OwnerEvicted)
                    .with_pid(victim.pid)
                    .with_count(victim.count)
                    .with_reason("subscription ceiling"),
            );
        }

        let sub = admitted.subscriber;
        debug!(subscriber = %sub.id, pid = sub.owner.pid, live, "subscriber added");
        self.shared.publish(
            BrokerEvent::new(BrokerEventKind::SubscriberAdded)
                .with_subscriber(sub.id)
                .with_pid(sub.owner.pid)
                .with_count(live),
        );

        self.replay_sticky(&sub);
        Ok(sub.id)
    }

    /// Removes a subscription and every event held for it.
    ///
    /// If the active chain is parked on this subscriber, it is finished with
    /// the chain's current result so the chain moves on.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), BrokerError> {
        let removed = self.shared.registry().unsubscribe(id);
        let sub = removed.ok_or(BrokerError::UnknownSubscriber { id })?;
        self.retire(&sub, "unsubscribed").await;
        Ok(())
    }

    /// Removes every subscription owned by a process that died.
    ///
    /// Returns the number of subscriptions removed.
    pub async fn on_owner_died(&self, pid: u32) -> usize {
        let removed = self.shared.registry().remove_owner(pid);
        for sub in &removed {
            self.retire(sub, "owner died").await;
        }
        if !removed.is_empty() {
            info!(pid, removed = removed.len(), "owner died; subscriptions removed");
        }
        removed.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().len()
    }

    /// Subscriptions owned by `pid`, in registration order.
    pub fn subscriptions_of(&self, pid: u32) -> Vec<SubscriberId> {
        self.shared.registry().ids_of(pid)
    }

    /// Ranked subscribers a publish would reach right now.
    pub fn matching(
        &self,
        event: &CommonEvent,
        options: &PublishOptions,
        publisher: &OwnerInfo,
    ) -> MatchResult {
        let mut publisher = publisher.clone();
        self.shared.fill_bundle(&mut publisher);
        let ctx = PublishContext::new(event, options, &publisher, self.shared.oracle.as_ref());
        self.shared.registry().matching(&ctx)
    }

    // === Publish ===

    /// Publishes an event.
    ///
    /// Unordered publishes go to the fresh queue; ordered ones become a new
    /// chain behind any chain already queued.
    ///
    /// # Errors
    /// - [`BrokerError::EmptyEventName`] for an unnamed event
    /// - [`BrokerError::NotPrivileged`] for a protected event from an unprivileged publisher
    /// - [`BrokerError::PermissionDenied`] for a sticky publish without the sticky permission
    /// - [`BrokerError::QueueFull`] / [`BrokerError::Closed`] when the work cannot be queued
    pub fn publish(
        &self,
        event: CommonEvent,
        options: &PublishOptions,
        publisher: &OwnerInfo,
    ) -> Result<PublishReceipt, BrokerError> {
        self.dispatch(event, options, publisher, None)
    }

    /// Publishes an event as an ordered chain and notifies `final_receiver`
    /// once with the chain's final result.
    pub fn publish_with_result(
        &self,
        event: CommonEvent,
        options: &PublishOptions,
        publisher: &OwnerInfo,
        final_receiver: Arc<dyn Notify>,
    ) -> Result<PublishReceipt, BrokerError> {
        let options = PublishOptions {
            ordered: true,
            ..options.clone()
        };
        self.dispatch(event, &options, publisher, Some(final_receiver))
    }

    fn dispatch(
        &self,
        event: CommonEvent,
        options: &PublishOptions,
        publisher: &OwnerInfo,
        final_receiver: Option<Arc<dyn Notify>>,
    ) -> Result<PublishReceipt, BrokerError> {
        if self.token.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let mut publisher = publisher.clone();
        self.shared.fill_bundle(&mut publisher);

        if let Err(err) = self.admit_publish(&event, options, &publisher) {
            warn!(event = event.name(), pid = publisher.pid, error = err.as_label(), "publish rejected");
            self.shared.publish(
                BrokerEvent::new(BrokerEventKind::PublishRejected)
                    .with_event(event.name_arc())
                    .with_pid(publisher.pid)
                    .with_reason(err.as_message()),
            );
            return Err(err);
        }

        let result = {
            let ctx = PublishContext::new(&event, options, &publisher, self.shared.oracle.as_ref());
            self.shared.registry().matching(&ctx)
        };
        if result.denied > 0 {
            self.shared.publish(
                BrokerEvent::new(BrokerEventKind::PermissionDenied)
                    .with_event(event.name_arc())
                    .with_count(result.denied),
            );
        }

        let matched = result.matched.len();
        let delivery = Delivery {
            ordered: options.ordered,
            sticky: options.sticky,
        };

        let mut chain = None;
        if options.ordered {
            if matched > 0 || final_receiver.is_some() {
                let id = ChainId(self.next_chain.fetch_add(1, Ordering::Relaxed) + 1);
                let receivers = result.matched.iter().map(|s| s.id).collect::<Vec<_>>();
                let mut ordered = OrderedChain::new(
                    id,
                    event.clone(),
                    delivery,
                    receivers,
                    self.shared.cfg.receiver_timeout,
                    self.shared.cfg.watchdog_budget(matched),
                );
                if let Some(receiver) = final_receiver {
                    ordered = ordered.with_final_receiver(receiver);
                }
                self.chains
                    .send(Command::Enqueue(ordered))
                    .map_err(|_| BrokerError::Closed)?;
                chain = Some(id);
            }
        } else if matched > 0 {
            let job = Job::Broadcast {
                event: Arc::new(event.clone()),
                delivery,
                targets: result.matched,
            };
            self.fresh.submit(job).map_err(|(err, _)| err)?;
        }

        if options.sticky {
            self.shared
                .sticky
                .put(StickyRecord::new(event.clone(), publisher.clone(), options.clone()));
        }
        self.shared.statics.publish(&event, &publisher, options);

        debug!(event = event.name(), pid = publisher.pid, matched, ordered = options.ordered, "event published");
        let mut rec = BrokerEvent::new(BrokerEventKind::EventPublished)
            .with_event(event.name_arc())
            .with_pid(publisher.pid)
            .with_count(matched);
        if let Some(id) = chain {
            rec = rec.with_chain(id);
        }
        self.shared.publish(rec);

        Ok(PublishReceipt {
            matched,
            denied: result.denied,
            chain,
        })
    }

    fn admit_publish(
        &self,
        event: &CommonEvent,
        options: &PublishOptions,
        publisher: &OwnerInfo,
    ) -> Result<(), BrokerError> {
        if event.name().is_empty() {
            return Err(BrokerError::EmptyEventName);
        }
        let oracle = self.shared.oracle.as_ref();
        if oracle.is_protected_event(event.name()) && !oracle.is_privileged(publisher.token) {
            return Err(BrokerError::NotPrivileged {
                event: event.name().to_string(),
            });
        }
        if options.sticky {
            if let Some(permission) = self.shared.cfg.sticky_permission.as_deref() {
                if !oracle.has_permission(publisher.token, permission) {
                    return Err(BrokerError::PermissionDenied {
                        permission: permission.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    // === Ordered chains ===

    /// Acknowledges the ordered delivery `receiver` is currently handling.
    ///
    /// Returns [`Outcome::Stale`] unless the active chain is parked on
    /// `receiver`; a stale finish changes nothing.
    pub async fn finish_receiver(
        &self,
        receiver: SubscriberId,
        code: i32,
        data: impl Into<String>,
        abort: bool,
    ) -> Outcome {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Finish {
            receiver,
            code,
            data: data.into(),
            abort,
            reply,
        };
        if self.chains.send(cmd).is_err() {
            return Outcome::Stale;
        }
        rx.await.unwrap_or(Outcome::Stale)
    }

    /// Snapshot of the active chain if it is parked on `receiver`.
    pub async fn active_receiver_of(&self, receiver: SubscriberId) -> Option<ChainSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.chains
            .send(Command::ActiveReceiverOf { receiver, reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    // === Freeze ===

    /// Freezes or thaws every subscription whose owner matches `selector`.
    ///
    /// Returns the number of subscriptions whose state changed. Thawing does
    /// not replay anything by itself; see [`flush_frozen`](Self::flush_frozen)
    /// and [`thaw`](Self::thaw).
    pub fn update_freeze(&self, selector: &ProcessSelector, frozen: bool) -> usize {
        let changed = self
            .shared
            .registry()
            .update_freeze(selector, frozen, Instant::now());
        let state = if frozen { "frozen" } else { "thawed" };
        info!(updated = changed, state, "freeze state updated");
        self.shared.publish(
            BrokerEvent::new(BrokerEventKind::FreezeUpdated)
                .with_count(changed)
                .with_reason(state),
        );
        changed
    }

    /// Drains the events held for `selector` and submits them to the replay queue.
    ///
    /// Returns the number of events submitted. If the replay queue refuses the
    /// batch the events are put back and the error is returned.
    pub fn flush_frozen(&self, selector: &ProcessSelector) -> Result<usize, BrokerError> {
        let entries = self.shared.vault().flush(selector);
        if entries.is_empty() {
            return Ok(0);
        }
        let n = entries.len();

        match self.replay.submit(Job::Replay { entries }) {
            Ok(()) => {
                info!(entries = n, "frozen events flushed");
                self.shared
                    .publish(BrokerEvent::new(BrokerEventKind::FrozenFlushed).with_count(n));
                Ok(n)
            }
            Err((err, job)) => {
                if let Job::Replay { entries } = job {
                    let registry = self.shared.registry();
                    let restored = self
                        .shared
                        .vault()
                        .restore(entries, |id| registry.resolve(id).is_some());
                    warn!(entries = n, restored, error = err.as_label(), "replay queue refused flush");
                }
                Err(err)
            }
        }
    }

    /// Thaws `selector` and replays what was held for it.
    pub fn thaw(&self, selector: &ProcessSelector) -> Result<usize, BrokerError> {
        self.update_freeze(selector, false);
        self.flush_frozen(selector)
    }

    /// Events currently held for `id`.
    pub fn frozen_pending(&self, id: SubscriberId) -> usize {
        self.shared.vault().pending_for(id)
    }

    // === Lifecycle ===

    /// Cancels every worker and waits for them to stop.
    ///
    /// Queued work that has not started is dropped.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            let _ = worker.await;
        }
        debug!("dispatch engine stopped");
    }

    /// Submits the sticky values the new subscription matches.
    ///
    /// Each value is evaluated against its original publisher and options.
    fn replay_sticky(&self, sub: &Arc<Subscriber>) {
        let oracle = self.shared.oracle.as_ref();
        for name in sub.skills.events() {
            let Some(record) = self.shared.sticky.get(name) else {
                continue;
            };
            let ctx = PublishContext::new(&record.event, &record.options, &record.publisher, oracle);
            let verdict = ctx.evaluate(sub);
            if verdict != Verdict::Deliver {
                debug!(subscriber = %sub.id, event = name.as_str(), ?verdict, "sticky value withheld");
                continue;
            }

            let job = Job::Broadcast {
                event: Arc::new(record.event),
                delivery: Delivery::UNORDERED.with_sticky(true),
                targets: vec![Arc::clone(sub)],
            };
            if let Err((err, _)) = self.fresh.submit(job) {
                warn!(subscriber = %sub.id, event = name.as_str(), error = err.as_label(), "sticky replay dropped");
            }
        }
    }

    async fn retire(&self, sub: &Subscriber, reason: &'static str) {
        let dropped = self.shared.vault().purge(sub.id);
        let released = self.release_parked(sub.id).await;
        debug!(subscriber = %sub.id, pid = sub.owner.pid, dropped, released, reason, "subscriber removed");
        self.shared.publish(
            BrokerEvent::new(BrokerEventKind::SubscriberRemoved)
                .with_subscriber(sub.id)
                .with_pid(sub.owner.pid)
                .with_reason(reason),
        );
    }

    async fn release_parked(&self, receiver: SubscriberId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.chains.send(Command::Release { receiver, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

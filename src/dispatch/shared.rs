//! State shared by the engine front-end, the delivery queues and the chain driver.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::collab::{
    BundleResolver, Delivery, Notify, PermissionOracle, ProcessKiller, StaticSubscribers,
    StickyStore,
};
use crate::config::BrokerConfig;
use crate::error::DeliveryError;
use crate::events::{BrokerEvent, BrokerEventKind, Bus};
use crate::freeze::FreezeVault;
use crate::model::{ChainId, CommonEvent, OwnerInfo, SubscriberId};
use crate::registry::{Subscriber, SubscriberRegistry};

use super::panic_message;

/// What a delivery worker may do with one receiver right now.
pub(crate) enum Admission {
    /// The subscription no longer exists.
    Gone,
    /// The subscription is frozen; the event was captured for replay.
    Frozen,
    /// Hand the event to this subscriber.
    Ready(Arc<Subscriber>),
}

pub(crate) struct Shared {
    pub cfg: BrokerConfig,
    pub bus: Bus,
    pub oracle: Arc<dyn PermissionOracle>,
    pub killer: Arc<dyn ProcessKiller>,
    pub bundles: Arc<dyn BundleResolver>,
    pub sticky: Arc<dyn StickyStore>,
    pub statics: Arc<dyn StaticSubscribers>,
    registry: Mutex<SubscriberRegistry>,
    vault: Mutex<FreezeVault>,
}

impl Shared {
    pub fn new(
        cfg: BrokerConfig,
        bus: Bus,
        oracle: Arc<dyn PermissionOracle>,
        killer: Arc<dyn ProcessKiller>,
        bundles: Arc<dyn BundleResolver>,
        sticky: Arc<dyn StickyStore>,
        statics: Arc<dyn StaticSubscribers>,
    ) -> Self {
        let registry = SubscriberRegistry::new(cfg.subscriber_ceiling());
        let vault = FreezeVault::new(cfg.freeze_retention);
        Self {
            cfg,
            bus,
            oracle,
            killer,
            bundles,
            sticky,
            statics,
            registry: Mutex::new(registry),
            vault: Mutex::new(vault),
        }
    }

    /// Locks the registry.
    ///
    /// Lock order is registry before vault.
    pub fn registry(&self) -> MutexGuard<'_, SubscriberRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn vault(&self) -> MutexGuard<'_, FreezeVault> {
        self.vault.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn publish(&self, ev: BrokerEvent) {
        self.bus.publish(ev);
    }

    /// Fills an empty bundle name from the resolver.
    pub fn fill_bundle(&self, owner: &mut OwnerInfo) {
        if owner.bundle_name.is_empty() {
            if let Some(name) = self.bundles.bundle_name(owner.uid) {
                owner.bundle_name = name;
            }
        }
    }

    /// Resolves `id` for delivery of `event`.
    ///
    /// A frozen subscriber gets the event captured while the registry lock is
    /// held, so a concurrent thaw either sees the capture in its flush or the
    /// delivery sees the subscriber thawed.
    pub fn admit(&self, id: SubscriberId, event: &CommonEvent, chain: Option<ChainId>) -> Admission {
        let resolved = {
            let registry = self.registry();
            let Some(resolved) = registry.resolve(id) else {
                return Admission::Gone;
            };
            if resolved.frozen {
                self.vault()
                    .capture(&resolved.subscriber, event.clone(), Instant::now());
            }
            resolved
        };

        if !resolved.frozen {
            return Admission::Ready(resolved.subscriber);
        }

        debug!(event = event.name(), subscriber = %id, "held for frozen subscriber");
        let mut rec = BrokerEvent::new(BrokerEventKind::EventFrozen)
            .with_event(event.name_arc())
            .with_subscriber(id)
            .with_pid(resolved.subscriber.owner.pid);
        if let Some(chain) = chain {
            rec = rec.with_chain(chain);
        }
        self.publish(rec);
        Admission::Frozen
    }

    /// Hands `event` to one receiver.
    ///
    /// Panics become [`DeliveryError::Panicked`]; a hand-off running past
    /// `handoff_timeout` becomes [`DeliveryError::HandoffTimeout`].
    pub async fn handoff(
        &self,
        receiver: &dyn Notify,
        event: &CommonEvent,
        delivery: Delivery,
    ) -> Result<(), DeliveryError> {
        let fut = AssertUnwindSafe(receiver.notify(event, delivery)).catch_unwind();
        let res = match self.cfg.handoff_limit() {
            Some(limit) => time::timeout(limit, fut)
                .await
                .map_err(|_| DeliveryError::HandoffTimeout)?,
            None => fut.await,
        };
        res.unwrap_or_else(|panic| {
            Err(DeliveryError::Panicked {
                info: panic_message(&*panic),
            })
        })
    }

    /// Records a failed hand-off to `sub`.
    pub fn delivery_failed(
        &self,
        sub: &Subscriber,
        event: &CommonEvent,
        chain: Option<ChainId>,
        err: &DeliveryError,
    ) {
        warn!(
            event = event.name(),
            subscriber = %sub.id,
            receiver = sub.receiver.name(),
            error = err.as_label(),
            "delivery failed"
        );
        let mut rec = BrokerEvent::new(BrokerEventKind::DeliveryFailed)
            .with_event(event.name_arc())
            .with_subscriber(sub.id)
            .with_pid(sub.owner.pid)
            .with_reason(err.to_string());
        if let Some(chain) = chain {
            rec = rec.with_chain(chain);
        }
        self.publish(rec);
    }
}

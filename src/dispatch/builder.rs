use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collab::{
    AllowAll, BundleResolver, LogOnlyKiller, MemoryStickyStore, NoBundles, NoStaticSubscribers,
    PermissionOracle, ProcessKiller, StaticSubscribers, StickyStore,
};
use crate::config::BrokerConfig;
use crate::events::{BrokerEvent, Bus};
use crate::observers::{Observe, ObserverSet};

use super::driver::ChainDriver;
use super::engine::DispatchEngine;
use super::queue::DeliveryQueue;
use super::shared::Shared;

/// Builder for a [`DispatchEngine`] and its collaborators.
///
/// Every collaborator has a default: [`AllowAll`], [`LogOnlyKiller`],
/// [`NoBundles`], [`MemoryStickyStore`] and [`NoStaticSubscribers`].
pub struct EngineBuilder {
    cfg: BrokerConfig,
    oracle: Arc<dyn PermissionOracle>,
    killer: Arc<dyn ProcessKiller>,
    bundles: Arc<dyn BundleResolver>,
    sticky: Arc<dyn StickyStore>,
    statics: Arc<dyn StaticSubscribers>,
    observers: Vec<Arc<dyn Observe>>,
}

impl EngineBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: BrokerConfig) -> Self {
        Self {
            cfg,
            oracle: Arc::new(AllowAll),
            killer: Arc::new(LogOnlyKiller),
            bundles: Arc::new(NoBundles),
            sticky: Arc::new(MemoryStickyStore::new()),
            statics: Arc::new(NoStaticSubscribers),
            observers: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, oracle: Arc<dyn PermissionOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_killer(mut self, killer: Arc<dyn ProcessKiller>) -> Self {
        self.killer = killer;
        self
    }

    pub fn with_bundles(mut self, bundles: Arc<dyn BundleResolver>) -> Self {
        self.bundles = bundles;
        self
    }

    pub fn with_sticky_store(mut self, sticky: Arc<dyn StickyStore>) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_static_subscribers(mut self, statics: Arc<dyn StaticSubscribers>) -> Self {
        self.statics = statics;
        self
    }

    /// Sets observers for broker records.
    ///
    /// Observers receive records through dedicated workers with bounded queues.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    /// Builds the engine and spawns its workers.
    ///
    /// Must be called inside a tokio runtime. Spawns:
    /// - the `fresh` and `replay` delivery queues
    /// - the ordered chain driver
    /// - the observer listener (only when observers are set)
    pub fn build(self) -> Arc<DispatchEngine> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let token = CancellationToken::new();
        let capacity = self.cfg.queue_capacity_clamped();

        let mut workers = Vec::with_capacity(4);
        if !self.observers.is_empty() {
            let set = ObserverSet::new(self.observers, bus.clone());
            workers.push(spawn_listener(set, bus.clone(), token.clone()));
        }

        let shared = Arc::new(Shared::new(
            self.cfg,
            bus,
            self.oracle,
            self.killer,
            self.bundles,
            self.sticky,
            self.statics,
        ));

        let (fresh, h) = DeliveryQueue::spawn("fresh", capacity, Arc::clone(&shared), token.clone());
        workers.push(h);
        let (replay, h) = DeliveryQueue::spawn("replay", capacity, Arc::clone(&shared), token.clone());
        workers.push(h);
        let (chains, h) = ChainDriver::spawn(Arc::clone(&shared), token.clone());
        workers.push(h);

        Arc::new(DispatchEngine::new_internal(
            shared, fresh, replay, chains, token, workers,
        ))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Forwards bus records to the observer set until cancelled.
fn spawn_listener(set: ObserverSet, bus: Bus, token: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(ev),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        set.emit(BrokerEvent::observer_overflow("listener", "lagged"));
                        continue;
                    }
                }
            }
        }
        set.shutdown().await;
    })
}

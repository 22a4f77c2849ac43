//! # commonevents
//!
//! **commonevents** is an in-process common-event broker.
//!
//! Processes register interest in named events; publishers broadcast events
//! either unordered (fan-out to every match) or ordered (a priority chain in
//! which each receiver may change the result or abort the rest). Events for
//! suspended ("frozen") processes are held and replayed when they thaw.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  subscribe   │   │   publish    │   │ freeze/thaw  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  DispatchEngine                                                   │
//! │  - SubscriberRegistry (event-name index, ceiling, freeze state)   │
//! │  - FreezeVault (held events, sliding retention window)            │
//! │  - collaborators: Notify, PermissionOracle, ProcessKiller, ...    │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │ fresh queue  │   │ replay queue │   │ chain driver │   │
//!     │ (unordered)  │   │ (flushed)    │   │ (ordered)    │   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ DeliveryFailed   │ DeliveryFailed   │ ChainStarted    │
//!      │ EventFrozen      │ EventFrozen      │ ReceiverTimedOut│
//!      │                  │                  │ WatchdogFired   │
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │               (capacity: BrokerConfig::bus_capacity)              │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                          observer_listener ──► ObserverSet ──► LogWriter, ...
//! ```
//!
//! ### Ordered chain
//! ```text
//! publish(ordered) ──► OrderedChain{receivers snapshot} ──► FIFO behind active chain
//!
//! loop {
//!   ├─► i = cursor++
//!   ├─► i past the end / abort set / watchdog expired ─► final receiver once, next chain
//!   ├─► receiver frozen  ─► Skipped, event captured for replay
//!   ├─► hand-off failed  ─► Skipped
//!   └─► hand-off ok      ─► park until finish_receiver() or the receiver deadline
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                         |
//! |-------------------|-------------------------------------------------------------|--------------------------------------------|
//! | **Registry**      | Subscribe/unsubscribe, ceiling eviction, matching rules.    | [`SubscribeRequest`], [`MatchSkills`]      |
//! | **Dispatch**      | Unordered fan-out, ordered chains, finish/timeout.          | [`DispatchEngine`], [`Outcome`]            |
//! | **Freeze**        | Hold events for suspended processes, replay on thaw.        | [`FreezeVault`], [`ProcessSelector`]       |
//! | **Collaborators** | Transport, permissions, process lifecycle, sticky cache.    | [`Notify`], [`PermissionOracle`]           |
//! | **Observability** | Broker records on a broadcast bus, pluggable observers.     | [`BrokerEvent`], [`Observe`], [`LogWriter`]|
//! | **Errors**        | Typed errors for callers and for single deliveries.         | [`BrokerError`], [`DeliveryError`]         |
//! | **Configuration** | Ceiling, deadlines, retention, queue sizes.                 | [`BrokerConfig`]                           |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio::sync::mpsc;
//! use commonevents::{
//!     BrokerConfig, CommonEvent, Delivery, DeliveryError, EngineBuilder, LogWriter, MatchSkills,
//!     Notify, Observe, OwnerInfo, PublishOptions, SubscribeRequest, SubscriberId, UserScope,
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
//!     let observers: Vec<Arc<dyn Observe>> = vec![Arc::new(LogWriter::new())];
//!     let engine = EngineBuilder::new(BrokerConfig::default())
//!         .with_observers(observers)
//!         .build();
//!
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let id: SubscriberId = engine.subscribe(
//!         SubscribeRequest::new(
//!             MatchSkills::new(["usual.event.BATTERY_LOW"]),
//!             OwnerInfo::new(812, 20010, "com.example.power"),
//!             Arc::new(Forward(tx)),
//!         )
//!         .with_scope(UserScope::All),
//!     )?;
//!
//!     // ordered: the receiver acknowledges, possibly changing the result
//!     engine.publish(
//!         CommonEvent::new("usual.event.BATTERY_LOW").with_code(15),
//!         &PublishOptions::ordered(),
//!         &OwnerInfo::new(1, 1000, "system"),
//!     )?;
//!     let got = rx.recv().await.expect("delivered");
//!     assert_eq!(got.code(), 15);
//!     engine.finish_receiver(id, 0, "handled", false).await;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
mod collab;
mod config;
mod dispatch;
mod error;
mod events;
mod freeze;
mod model;
mod observers;
mod registry;

// ---- Public re-exports ----

pub use collab::{
    AllowAll, BundleResolver, Delivery, EventPermission, LogOnlyKiller, MemoryStickyStore,
    NoBundles, NoStaticSubscribers, Notify, PermissionOracle, PermissionRule, ProcessKiller,
    StaticSubscribers, StickyRecord, StickyStore,
};
pub use config::BrokerConfig;
pub use dispatch::{
    ChainSnapshot, ChainState, DeliveryState, DispatchEngine, EngineBuilder, FinishReason,
    Outcome, PublishReceipt,
};
pub use error::{BrokerError, DeliveryError};
pub use events::{BrokerEvent, BrokerEventKind, Bus};
pub use freeze::{FreezeVault, FrozenDelivery};
pub use model::{
    AccessToken, ChainId, CommonEvent, FilterRule, MatchSkills, OwnerInfo, ProcessSelector,
    PublishOptions, SYSTEM_USER_BEGIN, SYSTEM_USER_END, SubscriberId, SubscriberType, TargetUser,
    UserScope,
};
pub use observers::{LogWriter, Observe, ObserverSet};
pub use registry::{
    Admitted, Eviction, MatchResult, Resolved, SubscribeRequest, Subscriber, SubscriberRegistry,
};

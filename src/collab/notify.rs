//! # Receiver transport.
//!
//! [`Notify`] is the only way the core talks to a subscriber. The transport
//! collaborator implements it; the core assumes nothing about whether the
//! receiver processes the event synchronously.
//!
//! ## Rules
//! - `Ok(())` means the hand-off succeeded. For ordered deliveries the chain then
//!   parks until the receiver calls
//!   [`DispatchEngine::finish_receiver`](crate::DispatchEngine::finish_receiver)
//!   or its deadline expires.
//! - `Err(_)` means the hand-off failed; the receiver is recorded as skipped.
//! - Implementations must not await the engine's acknowledgement paths from
//!   inside `notify`; acknowledge from another task instead.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use commonevents::{CommonEvent, Delivery, DeliveryError, Notify};
//! use tokio::sync::mpsc;
//!
//! struct Forward(mpsc::UnboundedSender<CommonEvent>);
//!
//! #[async_trait]
//! impl Notify for Forward {
//!     async fn notify(&self, event: &CommonEvent, _d: Delivery) -> Result<(), DeliveryError> {
//!         self.0.send(event.clone()).map_err(|_| DeliveryError::Closed)
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::model::CommonEvent;

/// Flags describing one delivery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Part of an ordered chain; the receiver is expected to finish.
    pub ordered: bool,
    /// The event is (or replays) a sticky value.
    pub sticky: bool,
}

impl Delivery {
    pub const UNORDERED: Delivery = Delivery {
        ordered: false,
        sticky: false,
    };

    pub const ORDERED: Delivery = Delivery {
        ordered: true,
        sticky: false,
    };

    #[inline]
    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }
}

/// Hands an event to one receiver across the process boundary.
#[async_trait]
pub trait Notify: Send + Sync + 'static {
    /// Delivers `event` to the receiver.
    async fn notify(&self, event: &CommonEvent, delivery: Delivery) -> Result<(), DeliveryError>;

    /// Returns the receiver name used in logs.
    ///
    /// The default uses `type_name::<Self>()`; override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

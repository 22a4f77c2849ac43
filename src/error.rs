//! Error types used by the broker and its receivers.
//!
//! This module defines two main error enums:
//!
//! - [`BrokerError`]: errors surfaced synchronously to callers of subscribe/publish.
//! - [`DeliveryError`]: errors raised while handing one event to one receiver.
//!
//! Delivery errors never reach a publisher: the dispatch engine absorbs them,
//! records the receiver as skipped and moves on.
//!
//! Both types provide `as_label` for logging/metrics.

use thiserror::Error;

use crate::model::SubscriberId;

/// # Errors surfaced by the broker to its callers.
///
/// Admission errors (malformed request, subscription ceiling) and permission
/// errors are reported here; nothing is registered or published when one is returned.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The event (or a filter entry) has an empty name.
    #[error("event name must not be empty")]
    EmptyEventName,

    /// A subscription filter declared no event names.
    #[error("subscription filter declares no events")]
    EmptyFilter,

    /// The subscription ceiling is reached and the caller owns the most subscriptions.
    #[error("too many subscribers: pid {pid} already owns {count}")]
    TooManySubscribers {
        /// Owning process of the rejected request.
        pid: u32,
        /// Live subscriptions that process already holds.
        count: usize,
    },

    /// The publisher lacks a permission required for this publish.
    #[error("permission denied: {permission}")]
    PermissionDenied {
        /// The missing permission.
        permission: String,
    },

    /// The event is reserved for privileged publishers.
    #[error("event {event} may only be published by a privileged caller")]
    NotPrivileged {
        /// Name of the protected event.
        event: String,
    },

    /// No live subscription exists with this id.
    #[error("unknown subscriber {id}")]
    UnknownSubscriber {
        /// The id passed by the caller.
        id: SubscriberId,
    },

    /// A delivery queue is at capacity.
    #[error("delivery queue {queue} is full")]
    QueueFull {
        /// Name of the saturated queue.
        queue: &'static str,
    },

    /// The engine was shut down.
    #[error("engine is shut down")]
    Closed,
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use commonevents::BrokerError;
    ///
    /// let err = BrokerError::TooManySubscribers { pid: 7, count: 300 };
    /// assert_eq!(err.as_label(), "too_many_subscribers");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::EmptyEventName => "empty_event_name",
            BrokerError::EmptyFilter => "empty_filter",
            BrokerError::TooManySubscribers { .. } => "too_many_subscribers",
            BrokerError::PermissionDenied { .. } => "permission_denied",
            BrokerError::NotPrivileged { .. } => "not_privileged",
            BrokerError::UnknownSubscriber { .. } => "unknown_subscriber",
            BrokerError::QueueFull { .. } => "queue_full",
            BrokerError::Closed => "closed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            BrokerError::TooManySubscribers { pid, count } => {
                format!("pid={pid} owns {count} subscriptions; ceiling reached")
            }
            BrokerError::PermissionDenied { permission } => {
                format!("missing permission {permission}")
            }
            other => other.to_string(),
        }
    }

    /// Indicates whether the request was rejected at admission time
    /// (malformed request or subscription ceiling).
    ///
    /// ```
    /// use commonevents::BrokerError;
    ///
    /// assert!(BrokerError::EmptyEventName.is_admission());
    /// assert!(!BrokerError::Closed.is_admission());
    /// ```
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            BrokerError::EmptyEventName
                | BrokerError::EmptyFilter
                | BrokerError::TooManySubscribers { .. }
        )
    }
}

/// # Errors produced while handing an event to a single receiver.
///
/// Recorded as a skipped delivery for that receiver only.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport refused or failed the hand-off.
    #[error("transport failure: {reason}")]
    Transport {
        /// Transport-specific detail.
        reason: String,
    },

    /// The receiving end is gone.
    #[error("receiver closed")]
    Closed,

    /// The receiver panicked during the hand-off.
    #[error("receiver panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The hand-off itself did not complete in time.
    #[error("hand-off timed out")]
    HandoffTimeout,
}

impl DeliveryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::Transport { .. } => "delivery_transport",
            DeliveryError::Closed => "delivery_closed",
            DeliveryError::Panicked { .. } => "delivery_panicked",
            DeliveryError::HandoffTimeout => "delivery_handoff_timeout",
        }
    }

    /// Convenience constructor for transport failures.
    pub fn transport(reason: impl Into<String>) -> Self {
        DeliveryError::Transport {
            reason: reason.into(),
        }
    }
}

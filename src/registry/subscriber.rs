//! # Subscription records.

use std::fmt;
use std::sync::Arc;

use crate::collab::Notify;
use crate::model::{MatchSkills, OwnerInfo, SubscriberId, UserScope};

/// Everything a caller supplies to subscribe.
///
/// ## Example
/// ```rust
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # use commonevents::{CommonEvent, Delivery, DeliveryError, Notify};
/// use commonevents::{MatchSkills, OwnerInfo, SubscribeRequest, UserScope};
/// # struct Sink;
/// # #[async_trait]
/// # impl Notify for Sink {
/// #     async fn notify(&self, _e: &CommonEvent, _d: Delivery) -> Result<(), DeliveryError> { Ok(()) }
/// # }
///
/// let req = SubscribeRequest::new(
///     MatchSkills::new(["usual.event.SCREEN_OFF"]),
///     OwnerInfo::new(812, 20010, "com.example.clock"),
///     Arc::new(Sink),
/// )
/// .with_priority(10)
/// .with_scope(UserScope::All)
/// .with_permission("permission.SEND_SCREEN_EVENTS");
///
/// assert_eq!(req.priority, 10);
/// ```
#[derive(Clone)]
pub struct SubscribeRequest {
    pub skills: MatchSkills,
    pub owner: OwnerInfo,
    /// Higher is delivered first in ordered chains.
    pub priority: i32,
    /// Permission the publisher must hold to reach this subscriber.
    pub permission: Option<String>,
    /// Only accept publishes from this bundle.
    pub publisher_bundle: Option<String>,
    /// Only accept publishes from this uid.
    pub publisher_uid: Option<u32>,
    pub scope: UserScope,
    pub receiver: Arc<dyn Notify>,
}

impl SubscribeRequest {
    /// Creates a request with priority 0, scope [`UserScope::Current`] and no constraints.
    pub fn new(skills: MatchSkills, owner: OwnerInfo, receiver: Arc<dyn Notify>) -> Self {
        Self {
            skills,
            owner,
            priority: 0,
            permission: None,
            publisher_bundle: None,
            publisher_uid: None,
            scope: UserScope::Current,
            receiver,
        }
    }

    #[inline]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    #[inline]
    pub fn with_publisher_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.publisher_bundle = Some(bundle.into());
        self
    }

    #[inline]
    pub fn with_publisher_uid(mut self, uid: u32) -> Self {
        self.publisher_uid = Some(uid);
        self
    }

    #[inline]
    pub fn with_scope(mut self, scope: UserScope) -> Self {
        self.scope = scope;
        self
    }
}

/// A live subscription.
///
/// Immutable once registered; freeze state is tracked by the registry.
pub struct Subscriber {
    pub id: SubscriberId,
    pub skills: MatchSkills,
    pub owner: OwnerInfo,
    pub priority: i32,
    pub permission: Option<String>,
    pub publisher_bundle: Option<String>,
    pub publisher_uid: Option<u32>,
    /// Resolved scope; never [`UserScope::Current`].
    pub scope: UserScope,
    /// Owner was privileged at subscribe time.
    pub is_system: bool,
    pub receiver: Arc<dyn Notify>,
}

impl Subscriber {
    pub(crate) fn from_request(id: SubscriberId, req: SubscribeRequest, is_system: bool) -> Self {
        let scope = req.scope.resolve(&req.owner);
        Self {
            id,
            skills: req.skills,
            owner: req.owner,
            priority: req.priority,
            permission: req.permission,
            publisher_bundle: req.publisher_bundle,
            publisher_uid: req.publisher_uid,
            scope,
            is_system,
            receiver: req.receiver,
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("scope", &self.scope)
            .field("receiver", &self.receiver.name())
            .finish_non_exhaustive()
    }
}

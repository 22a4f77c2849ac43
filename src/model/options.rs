//! # Publish options.
//!
//! [`PublishOptions`] selects the delivery mode (ordered/sticky) and narrows the
//! set of eligible subscribers.
//!
//! The bundle, uid allow-list and subscriber-type filters form one combinable
//! group: with [`FilterRule::And`] every filter that is set must hold, with
//! [`FilterRule::Or`] at least one must. When none is set the group passes.
//!
//! ## Example
//! ```rust
//! use commonevents::{FilterRule, PublishOptions, SubscriberType};
//!
//! let opts = PublishOptions::ordered()
//!     .with_bundle("com.example.settings")
//!     .with_subscriber_type(SubscriberType::SystemApp)
//!     .with_filter_rule(FilterRule::Or);
//!
//! assert!(opts.ordered);
//! assert!(opts.has_publish_filters());
//! ```

use crate::model::TargetUser;

/// How the combinable publish-side filters are joined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterRule {
    /// Every filter that is set must hold.
    #[default]
    And,
    /// At least one filter that is set must hold.
    Or,
}

/// Kind of subscriber a publish is restricted to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubscriberType {
    #[default]
    All,
    /// Only privileged (system) subscribers.
    SystemApp,
}

/// Delivery options supplied with a publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Deliver as a priority-ordered chain.
    pub ordered: bool,
    /// Record as the sticky value for late subscribers.
    pub sticky: bool,
    /// Only subscribers owned by this bundle.
    pub bundle_name: Option<String>,
    /// Permissions every receiving subscriber must hold.
    pub subscriber_permissions: Vec<String>,
    /// Only subscribers owned by one of these uids (empty = any).
    pub subscriber_uids: Vec<u32>,
    /// Only subscribers of this type (`None` or `All` = any).
    pub subscriber_type: Option<SubscriberType>,
    /// Combination rule for bundle / uid / type filters.
    pub filter_rule: FilterRule,
    /// User the publish is addressed to.
    pub target_user: TargetUser,
}

impl PublishOptions {
    /// Options for an unordered, non-sticky publish.
    pub fn unordered() -> Self {
        Self::default()
    }

    /// Options for an ordered publish.
    pub fn ordered() -> Self {
        Self {
            ordered: true,
            ..Self::default()
        }
    }

    #[inline]
    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    #[inline]
    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle_name = Some(bundle.into());
        self
    }

    #[inline]
    pub fn with_subscriber_permission(mut self, permission: impl Into<String>) -> Self {
        self.subscriber_permissions.push(permission.into());
        self
    }

    #[inline]
    pub fn with_subscriber_uids<I: IntoIterator<Item = u32>>(mut self, uids: I) -> Self {
        self.subscriber_uids.extend(uids);
        self
    }

    #[inline]
    pub fn with_subscriber_type(mut self, kind: SubscriberType) -> Self {
        self.subscriber_type = Some(kind);
        self
    }

    #[inline]
    pub fn with_filter_rule(mut self, rule: FilterRule) -> Self {
        self.filter_rule = rule;
        self
    }

    #[inline]
    pub fn with_target_user(mut self, user: TargetUser) -> Self {
        self.target_user = user;
        self
    }

    /// Returns true if any of the combinable filters is set.
    pub fn has_publish_filters(&self) -> bool {
        self.bundle_name.as_deref().is_some_and(|b| !b.is_empty())
            || !self.subscriber_uids.is_empty()
            || matches!(self.subscriber_type, Some(SubscriberType::SystemApp))
    }
}

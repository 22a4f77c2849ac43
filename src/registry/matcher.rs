//! Per-subscriber matching rules for one publish.

use crate::collab::{EventPermission, PermissionOracle};
use crate::model::{CommonEvent, FilterRule, OwnerInfo, PublishOptions, SubscriberType, TargetUser, UserScope};

use super::Subscriber;

/// Result of evaluating one subscriber against one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Deliver,
    /// Not interested, not visible, or excluded by a filter.
    Filtered,
    /// Eligible, but a permission check failed in either direction.
    Denied,
}

/// Everything about a publish that matching needs, resolved once per publish.
pub(crate) struct PublishContext<'a> {
    pub event: &'a CommonEvent,
    pub options: &'a PublishOptions,
    pub publisher: &'a OwnerInfo,
    pub publisher_privileged: bool,
    pub target: TargetUser,
    pub oracle: &'a dyn PermissionOracle,
    pub event_permission: Option<EventPermission>,
}

impl<'a> PublishContext<'a> {
    pub fn new(
        event: &'a CommonEvent,
        options: &'a PublishOptions,
        publisher: &'a OwnerInfo,
        oracle: &'a dyn PermissionOracle,
    ) -> Self {
        Self {
            event,
            options,
            publisher,
            publisher_privileged: oracle.is_privileged(publisher.token),
            target: options.target_user.resolve(publisher),
            oracle,
            event_permission: oracle.event_permission(event.name()),
        }
    }

    pub fn evaluate(&self, sub: &Subscriber) -> Verdict {
        if !sub.skills.matches(self.event) {
            return Verdict::Filtered;
        }
        if !visible(sub.scope, self.publisher_privileged, self.target) {
            return Verdict::Filtered;
        }
        if !self.publisher_pins_hold(sub) || !publish_filters_hold(sub, self.options) {
            return Verdict::Filtered;
        }
        if !self.permissions_hold(sub) {
            return Verdict::Denied;
        }
        Verdict::Deliver
    }

    fn publisher_pins_hold(&self, sub: &Subscriber) -> bool {
        let bundle_ok = sub
            .publisher_bundle
            .as_deref()
            .is_none_or(|b| b.is_empty() || b == self.publisher.bundle_name);
        let uid_ok = sub.publisher_uid.is_none_or(|uid| uid == self.publisher.uid);
        bundle_ok && uid_ok
    }

    fn permissions_hold(&self, sub: &Subscriber) -> bool {
        // publisher → subscriber
        if let Some(required) = sub.permission.as_deref().filter(|p| !p.is_empty()) {
            if !self.oracle.has_permission(self.publisher.token, required) {
                return false;
            }
        }
        // subscriber → publisher
        let granted = self
            .options
            .subscriber_permissions
            .iter()
            .all(|p| self.oracle.has_permission(sub.owner.token, p));
        if !granted {
            return false;
        }
        self.event_permission
            .as_ref()
            .is_none_or(|req| req.satisfied_by(self.oracle, sub.owner.token))
    }
}

/// Visibility of a subscription scope to a publish addressed at `target`.
pub(crate) fn visible(scope: UserScope, publisher_privileged: bool, target: TargetUser) -> bool {
    let UserScope::User(user) = scope else {
        return true;
    };
    if target == TargetUser::User(user) {
        return true;
    }
    publisher_privileged
        && (matches!(target, TargetUser::Unspecified | TargetUser::All) || scope.is_system_user())
}

/// Combinable bundle / uid / subscriber-type filters.
pub(crate) fn publish_filters_hold(sub: &Subscriber, options: &PublishOptions) -> bool {
    if !options.has_publish_filters() {
        return true;
    }
    let mut checks: [Option<bool>; 3] = [None; 3];

    if let Some(bundle) = options.bundle_name.as_deref().filter(|b| !b.is_empty()) {
        checks[0] = Some(sub.owner.bundle_name == bundle);
    }
    if !options.subscriber_uids.is_empty() {
        checks[1] = Some(options.subscriber_uids.contains(&sub.owner.uid));
    }
    if matches!(options.subscriber_type, Some(SubscriberType::SystemApp)) {
        checks[2] = Some(sub.is_system);
    }

    let mut set = checks.into_iter().flatten();
    match options.filter_rule {
        FilterRule::And => set.all(|ok| ok),
        FilterRule::Or => set.any(|ok| ok),
    }
}

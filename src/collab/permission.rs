//! # Permission and identity oracle.

use crate::model::AccessToken;

/// Answers permission and privilege questions about callers.
///
/// Used by subscriber matching (both directions) and publish admission.
pub trait PermissionOracle: Send + Sync + 'static {
    /// Returns true if the holder of `token` was granted `permission`.
    fn has_permission(&self, token: AccessToken, permission: &str) -> bool;

    /// Returns true for native/subsystem callers and verified system applications.
    fn is_privileged(&self, token: AccessToken) -> bool;

    /// Permissions a subscriber must hold to receive `event`, if any.
    fn event_permission(&self, _event: &str) -> Option<EventPermission> {
        None
    }

    /// Returns true if only privileged callers may publish `event`.
    fn is_protected_event(&self, _event: &str) -> bool {
        false
    }
}

/// How the permissions of an [`EventPermission`] combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PermissionRule {
    /// All listed permissions are required.
    #[default]
    All,
    /// Any one of the listed permissions is enough.
    Any,
}

/// Receive-side permission requirement attached to an event name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventPermission {
    pub permissions: Vec<String>,
    pub rule: PermissionRule,
}

impl EventPermission {
    pub fn all<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            rule: PermissionRule::All,
        }
    }

    pub fn any<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            rule: PermissionRule::Any,
        }
    }

    /// Returns true if `token` satisfies the requirement.
    pub fn satisfied_by(&self, oracle: &dyn PermissionOracle, token: AccessToken) -> bool {
        if self.permissions.is_empty() {
            return true;
        }
        let mut granted = self
            .permissions
            .iter()
            .map(|p| oracle.has_permission(token, p));
        match self.rule {
            PermissionRule::All => granted.all(|ok| ok),
            PermissionRule::Any => granted.any(|ok| ok),
        }
    }
}

/// Oracle that grants everything and treats every caller as privileged.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn has_permission(&self, _token: AccessToken, _permission: &str) -> bool {
        true
    }

    fn is_privileged(&self, _token: AccessToken) -> bool {
        true
    }
}

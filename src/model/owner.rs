//! # Identities: subscriptions, chains, owning processes and users.

use std::collections::BTreeSet;
use std::fmt;

/// First user id of the reserved system-user range.
pub const SYSTEM_USER_BEGIN: i32 = 0;
/// Last user id of the reserved system-user range.
pub const SYSTEM_USER_END: i32 = 99;

/// Opaque handle of one live subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl SubscriberId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Identifier of one ordered publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub(crate) u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

/// Security token handed to the permission oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessToken(pub u64);

/// Descriptor of the process that owns a subscription or issues a publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerInfo {
    pub pid: u32,
    pub uid: u32,
    /// User the process runs as.
    pub user_id: i32,
    /// Bundle name; empty means "resolve from uid".
    pub bundle_name: String,
    pub token: AccessToken,
}

impl OwnerInfo {
    pub fn new(pid: u32, uid: u32, bundle_name: impl Into<String>) -> Self {
        Self {
            pid,
            uid,
            user_id: 100,
            bundle_name: bundle_name.into(),
            token: AccessToken(u64::from(uid)),
        }
    }

    #[inline]
    pub fn with_user(mut self, user_id: i32) -> Self {
        self.user_id = user_id;
        self
    }

    #[inline]
    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.token = token;
        self
    }
}

/// Visibility scope of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserScope {
    /// Visible to publishes for every user.
    All,
    /// The subscribing process's own user; resolved at subscribe time.
    Current,
    /// One specific user.
    User(i32),
}

impl UserScope {
    /// Resolves `Current` against the owner's user.
    pub fn resolve(self, owner: &OwnerInfo) -> UserScope {
        match self {
            UserScope::Current => UserScope::User(owner.user_id),
            other => other,
        }
    }

    /// Returns true for user ids in the reserved system range.
    pub fn is_system_user(self) -> bool {
        matches!(self, UserScope::User(id) if (SYSTEM_USER_BEGIN..=SYSTEM_USER_END).contains(&id))
    }
}

/// User a publish is addressed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetUser {
    /// The publisher did not name a user.
    #[default]
    Unspecified,
    /// Every user.
    All,
    /// The publisher's own user.
    Current,
    /// One specific user.
    User(i32),
}

impl TargetUser {
    /// Resolves `Current` against the publisher's user.
    pub fn resolve(self, publisher: &OwnerInfo) -> TargetUser {
        match self {
            TargetUser::Current => TargetUser::User(publisher.user_id),
            other => other,
        }
    }
}

/// Selects owning processes for freeze, thaw and flush operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessSelector {
    /// Every process.
    All,
    /// Every process running under this uid.
    Uid(u32),
    /// Exactly these processes.
    Pids(BTreeSet<u32>),
}

impl ProcessSelector {
    pub fn pids<I: IntoIterator<Item = u32>>(pids: I) -> Self {
        ProcessSelector::Pids(pids.into_iter().collect())
    }

    pub fn matches(&self, owner: &OwnerInfo) -> bool {
        match self {
            ProcessSelector::All => true,
            ProcessSelector::Uid(uid) => owner.uid == *uid,
            ProcessSelector::Pids(pids) => pids.contains(&owner.pid),
        }
    }
}

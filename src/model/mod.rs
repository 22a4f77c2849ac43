//! Shared data model: events, interest filters, publish options and identities.
//!
//! ## Contents
//! - [`CommonEvent`] the published descriptor (name, entities, scheme, payload)
//! - [`MatchSkills`] a subscriber's declared interest
//! - [`PublishOptions`] delivery mode and publish-side filters
//! - [`OwnerInfo`], [`SubscriberId`], [`ChainId`], [`UserScope`], [`TargetUser`],
//!   [`ProcessSelector`] identities and selectors

mod event;
mod options;
mod owner;
mod skills;

pub use event::CommonEvent;
pub use options::{FilterRule, PublishOptions, SubscriberType};
pub use owner::{
    AccessToken, ChainId, OwnerInfo, ProcessSelector, SYSTEM_USER_BEGIN, SYSTEM_USER_END,
    SubscriberId, TargetUser, UserScope,
};
pub use skills::MatchSkills;

//! # Subscription interest.
//!
//! [`MatchSkills`] is the declared interest of a subscriber. An event matches when:
//! - its name is one of the declared events, and
//! - every declared entity is carried by the event (no entities = any), and
//! - the event scheme is one of the declared schemes (no schemes = any).

use std::collections::BTreeSet;

use crate::error::BrokerError;
use crate::model::CommonEvent;

/// Declared interest of one subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchSkills {
    events: BTreeSet<String>,
    entities: BTreeSet<String>,
    schemes: BTreeSet<String>,
}

impl MatchSkills {
    /// Creates a filter over the given event names.
    pub fn new<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            events: events.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.insert(event.into());
        self
    }

    #[inline]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.insert(entity.into());
        self
    }

    #[inline]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.schemes.insert(scheme.into());
        self
    }

    pub fn events(&self) -> &BTreeSet<String> {
        &self.events
    }

    pub fn entities(&self) -> &BTreeSet<String> {
        &self.entities
    }

    pub fn schemes(&self) -> &BTreeSet<String> {
        &self.schemes
    }

    /// Checks the filter is usable for a subscription.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.events.is_empty() {
            return Err(BrokerError::EmptyFilter);
        }
        if self.events.iter().any(String::is_empty) {
            return Err(BrokerError::EmptyEventName);
        }
        Ok(())
    }

    /// Returns true if `event` satisfies this interest.
    pub fn matches(&self, event: &CommonEvent) -> bool {
        self.matches_event(event.name())
            && self.matches_entities(event)
            && self.matches_scheme(event.scheme())
    }

    #[inline]
    pub fn matches_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }

    fn matches_entities(&self, event: &CommonEvent) -> bool {
        self.entities.is_subset(event.entities())
    }

    fn matches_scheme(&self, scheme: Option<&str>) -> bool {
        if self.schemes.is_empty() {
            return true;
        }
        scheme.is_some_and(|s| self.schemes.contains(s))
    }
}

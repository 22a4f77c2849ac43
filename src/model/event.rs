//! # Common event descriptor.
//!
//! [`CommonEvent`] is what publishers hand to the broker: a name, optional
//! entities and scheme used for matching, and an opaque payload.
//!
//! The descriptor is immutable after publish, except for the result pair
//! (`code`, `data`), which receivers of an ordered chain may rewrite as the
//! chain progresses.
//!
//! ## Example
//! ```rust
//! use commonevents::CommonEvent;
//!
//! let ev = CommonEvent::new("usual.event.SCREEN_ON")
//!     .with_entity("entity.system.home")
//!     .with_scheme("file")
//!     .with_code(1)
//!     .with_data("initial")
//!     .with_param("reason", "power_key");
//!
//! assert_eq!(ev.name(), "usual.event.SCREEN_ON");
//! assert_eq!(ev.code(), 1);
//! assert_eq!(ev.param("reason"), Some("power_key"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A named state-change notification with its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommonEvent {
    name: Arc<str>,
    entities: BTreeSet<String>,
    scheme: Option<String>,
    code: i32,
    data: String,
    params: BTreeMap<String, String>,
}

impl CommonEvent {
    /// Creates an event with the given name and an empty payload.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            entities: BTreeSet::new(),
            scheme: None,
            code: 0,
            data: String::new(),
            params: BTreeMap::new(),
        }
    }

    /// Adds an entity the event carries.
    #[inline]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.insert(entity.into());
        self
    }

    /// Sets the event scheme.
    #[inline]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Sets the initial result code.
    #[inline]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    /// Sets the initial result data.
    #[inline]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Adds a key/value parameter.
    #[inline]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the name, cheap to clone into observability records.
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn entities(&self) -> &BTreeSet<String> {
        &self.entities
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Rewrites the result pair. Only ordered chains call this.
    pub(crate) fn set_result(&mut self, code: i32, data: String) {
        self.code = code;
        self.data = data;
    }
}

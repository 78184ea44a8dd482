//! Server-side event filters.
//!
//! A filter decides, at publish time, whether an event enters a particular
//! user's queue for a particular domain. The registry works with any
//! [`EventFilter`]; [`EventFilterSpec`] is the serializable set of filters
//! that clients can send over the wire.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use super::Event;

/// Predicate deciding whether an event is delivered to a user.
pub trait EventFilter: fmt::Debug + Send + Sync {
    /// Returns `true` if the event should be enqueued.
    fn matches(&self, event: &Event) -> bool;
}

/// Shared handle to a filter.
pub type SharedEventFilter = Arc<dyn EventFilter>;

/// Filter description that can travel between client and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventFilterSpec {
    /// Accepts events whose type is one of the listed names.
    EventType {
        /// Accepted type discriminators.
        types: Vec<String>,
    },
    /// Accepts events whose body has `field` equal to `value`.
    FieldEquals {
        /// Top-level body field name.
        field: String,
        /// Expected value.
        value: serde_json::Value,
    },
    /// Inverts the inner filter.
    Not {
        /// Filter to invert.
        filter: Box<EventFilterSpec>,
    },
    /// Accepts events accepted by every inner filter.
    All {
        /// Filters that must all accept.
        filters: Vec<EventFilterSpec>,
    },
    /// Accepts events accepted by at least one inner filter.
    Any {
        /// Filters of which one must accept.
        filters: Vec<EventFilterSpec>,
    },
    /// Rejects every event.
    RejectAll,
}

impl EventFilterSpec {
    /// Builds a shared filter handle from this description.
    #[must_use]
    pub fn into_shared(self) -> SharedEventFilter {
        Arc::new(self)
    }
}

impl EventFilter for EventFilterSpec {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Self::EventType { types } => types.iter().any(|t| *t == event.event_type),
            Self::FieldEquals { field, value } => event.field(field) == Some(value),
            Self::Not { filter } => !filter.matches(event),
            Self::All { filters } => filters.iter().all(|f| f.matches(event)),
            Self::Any { filters } => filters.iter().any(|f| f.matches(event)),
            Self::RejectAll => false,
        }
    }
}

/// Adapts a closure into an [`EventFilter`] for in-process publishers.
pub struct FnFilter<F>(F);

impl<F> FnFilter<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    /// Wraps the closure.
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnFilter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter").finish_non_exhaustive()
    }
}

impl<F> EventFilter for FnFilter<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn matches(&self, event: &Event) -> bool {
        (self.0)(event)
    }
}

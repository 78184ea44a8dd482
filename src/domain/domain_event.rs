//! Events tagged with the domain they were published on.

use serde::{Deserialize, Serialize};

use super::{Domain, Event};

/// An [`Event`] paired with the [`Domain`] it was published to.
///
/// Created when an event enters the registry; each subscribed user's queue
/// holds its own copy, which the listen cycle consumes exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Domain the event was published on.
    pub domain: Domain,
    /// Event payload.
    pub event: Event,
}

impl DomainEvent {
    /// Pairs an event with its domain.
    #[must_use]
    pub const fn new(domain: Domain, event: Event) -> Self {
        Self { domain, event }
    }

    /// Returns the domain.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Returns the event.
    #[must_use]
    pub const fn event(&self) -> &Event {
        &self.event
    }
}

//! Unsubscription notifications.
//!
//! Whenever a user leaves the registry, either by explicit unregistration or
//! by activity timeout, an [`UnlistenEvent`] is published on
//! [`super::Domain::unlisten`] so other clients can react.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Domain, EventPayload};

/// Notification that a user stopped listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlistenEvent {
    /// The user that left.
    pub user_id: String,
    /// Domains the user was registered to when it left.
    pub domains: BTreeSet<Domain>,
    /// `true` if the user was evicted by the activity scheduler.
    pub timeout: bool,
    /// When the user left.
    pub timestamp: DateTime<Utc>,
}

impl UnlistenEvent {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn new(user_id: impl Into<String>, domains: BTreeSet<Domain>, timeout: bool) -> Self {
        Self {
            user_id: user_id.into(),
            domains,
            timeout,
            timestamp: Utc::now(),
        }
    }
}

impl EventPayload for UnlistenEvent {
    const TYPE: &'static str = "unlisten";
}

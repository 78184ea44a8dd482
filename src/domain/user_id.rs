//! Type-safe user (connection) identifier.
//!
//! [`UserId`] is a newtype over the connection id string handed out by the
//! configured connection id generator, so it cannot be confused with domain
//! names or other strings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable identifier of a connected client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Arc<str>);

impl UserId {
    /// Creates a user id from any string.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Creates a random user id (UUID v4).
    #[must_use]
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<uuid::Uuid> for UserId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self::new(uuid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_generates_unique_ids() {
        assert_ne!(UserId::random(), UserId::random());
    }

    #[test]
    fn display_is_inner_string() {
        let id = UserId::new("session-42");
        assert_eq!(format!("{id}"), "session-42");
        assert_eq!(id.as_str(), "session-42");
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::new("u1");
        assert_eq!(serde_json::to_string(&id).ok().as_deref(), Some("\"u1\""));
    }
}

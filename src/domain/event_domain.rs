//! Named event scopes.
//!
//! A [`Domain`] is the unit clients subscribe to and publishers publish on.
//! Two well-known domains are reserved: [`Domain::user_specific`] for events
//! routed to a single user, and [`Domain::unlisten`] for notifications about
//! users that left (explicitly or by timeout).

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::EventServiceError;

/// Name of the domain that carries events addressed to one user.
pub const USER_SPECIFIC_DOMAIN_NAME: &str = "eventservice.user_specific";

/// Name of the domain that carries [`super::UnlistenEvent`]s.
pub const UNLISTEN_DOMAIN_NAME: &str = "eventservice.unlisten";

/// Immutable, cheaply clonable scope identifier.
///
/// Equality, ordering and hashing are by name. The name is normalized on
/// construction (surrounding whitespace trimmed) and must not be empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(Arc<str>);

impl Domain {
    /// Creates a domain from a name.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::InvalidRequest`] if the name is empty
    /// after trimming.
    pub fn new(name: impl AsRef<str>) -> Result<Self, EventServiceError> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            return Err(EventServiceError::InvalidRequest(
                "domain name must not be empty".to_string(),
            ));
        }
        Ok(Self(Arc::from(trimmed)))
    }

    /// The domain for events routed to a single user by id.
    #[must_use]
    pub fn user_specific() -> Self {
        Self(Arc::from(USER_SPECIFIC_DOMAIN_NAME))
    }

    /// The domain that carries unsubscription notifications.
    #[must_use]
    pub fn unlisten() -> Self {
        Self(Arc::from(UNLISTEN_DOMAIN_NAME))
    }

    /// Returns the domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the user-specific domain.
    #[must_use]
    pub fn is_user_specific(&self) -> bool {
        self.name() == USER_SPECIFIC_DOMAIN_NAME
    }

    /// Returns `true` for the unlisten domain.
    #[must_use]
    pub fn is_unlisten(&self) -> bool {
        self.name() == UNLISTEN_DOMAIN_NAME
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Domain {
    type Error = EventServiceError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl TryFrom<&str> for Domain {
    type Error = EventServiceError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0.to_string()
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Interns domain names so that every handle for the same name shares one
/// allocation.
///
/// The registry owns one factory and routes every name arriving over the
/// wire through it.
#[derive(Debug, Default)]
pub struct DomainFactory {
    domains: DashMap<String, Domain>,
}

impl DomainFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the interned domain for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::InvalidRequest`] if the name is empty.
    pub fn get_domain(&self, name: &str) -> Result<Domain, EventServiceError> {
        let domain = Domain::new(name)?;
        Ok(self
            .domains
            .entry(domain.name().to_string())
            .or_insert(domain)
            .value()
            .clone())
    }

    /// Returns the number of distinct domains handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns `true` if no domain has been handed out yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

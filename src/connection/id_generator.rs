//! Connection id assignment.

use axum::http::HeaderMap;

use crate::config::ConnectionIdStrategy;
use crate::domain::UserId;
use crate::error::EventServiceError;

/// Header carrying a server-assigned connection id.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Header carrying the host application's session id.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Resolves the user id behind a request.
///
/// - [`ConnectionIdGenerator::Uuid`]: the server hands out a fresh id on init
///   and the client echoes it in [`CONNECTION_ID_HEADER`].
/// - [`ConnectionIdGenerator::Session`]: the host's session id, sent in
///   [`SESSION_ID_HEADER`], is the user id. Init only confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIdGenerator {
    /// Random UUID v4 per client instance.
    Uuid,
    /// Host session id.
    Session,
}

impl From<ConnectionIdStrategy> for ConnectionIdGenerator {
    fn from(strategy: ConnectionIdStrategy) -> Self {
        match strategy {
            ConnectionIdStrategy::Uuid => Self::Uuid,
            ConnectionIdStrategy::Session => Self::Session,
        }
    }
}

impl ConnectionIdGenerator {
    /// Returns the header this generator reads the id from.
    #[must_use]
    pub const fn header_name(&self) -> &'static str {
        match self {
            Self::Uuid => CONNECTION_ID_HEADER,
            Self::Session => SESSION_ID_HEADER,
        }
    }

    /// Assigns an id for an init request.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::InvalidRequest`] if the session generator
    /// finds no session header.
    pub fn generate(&self, headers: &HeaderMap) -> Result<UserId, EventServiceError> {
        match self {
            Self::Uuid => Ok(UserId::random()),
            Self::Session => self.resolve(headers),
        }
    }

    /// Reads the id of a follow-up request.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::InvalidRequest`] if the header is missing,
    /// not valid ASCII or empty.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<UserId, EventServiceError> {
        let header = self.header_name();
        let value = headers
            .get(header)
            .ok_or_else(|| EventServiceError::InvalidRequest(format!("missing {header} header")))?
            .to_str()
            .map_err(|e| EventServiceError::InvalidRequest(format!("{header}: {e}")))?
            .trim();
        if value.is_empty() {
            return Err(EventServiceError::InvalidRequest(format!("empty {header} header")));
        }
        Ok(UserId::new(value))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn uuid_ids_are_fresh_and_read_from_connection_header() {
        let generator = ConnectionIdGenerator::Uuid;
        let (Ok(a), Ok(b)) = (
            generator.generate(&HeaderMap::new()),
            generator.generate(&HeaderMap::new()),
        ) else {
            panic!("uuid generation never fails");
        };
        assert_ne!(a, b);

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(generator.resolve(&headers).ok(), Some(UserId::new("abc")));
    }

    #[test]
    fn session_generator_needs_the_session_header() {
        let generator = ConnectionIdGenerator::from(ConnectionIdStrategy::Session);
        assert!(matches!(
            generator.generate(&HeaderMap::new()),
            Err(EventServiceError::InvalidRequest(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("sess-1"));
        assert_eq!(generator.generate(&headers).ok(), Some(UserId::new("sess-1")));
    }

    #[test]
    fn blank_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION_ID_HEADER, HeaderValue::from_static("  "));
        assert!(ConnectionIdGenerator::Uuid.resolve(&headers).is_err());
    }
}

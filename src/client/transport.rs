//! Wire calls of the client, independent of the HTTP library.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::api::dto::InitResponse;
use crate::codec::{ListenResponse, WireDomainEvent};
use crate::domain::EventFilterSpec;

use crate::error::EventServiceError;

/// Raw body chunks of a streaming listen response.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, EventServiceError>>;

/// One remote call per method. Implementations remember the connection id
/// returned by [`EventServiceTransport::init`] and attach it to every later
/// call.
///
/// Errors follow one rule: [`EventServiceError::UnknownUser`] when the server
/// has forgotten this client, [`EventServiceError::TransientTransport`] for
/// failures worth an immediate retry, [`EventServiceError::FatalTransport`]
/// for everything that is not.
#[async_trait]
pub trait EventServiceTransport: Send + Sync + fmt::Debug {
    /// Opens the connection and learns the server's settings.
    async fn init(&self) -> Result<InitResponse, EventServiceError>;

    /// Returns `true` if this transport can hold a response open and read it
    /// incrementally.
    fn supports_streaming(&self) -> bool;

    /// Registers one domain.
    async fn register(
        &self,
        domain: &str,
        filter: Option<&EventFilterSpec>,
    ) -> Result<(), EventServiceError>;

    /// Unregisters a batch of domains in one call.
    async fn unregister(&self, domains: &[String]) -> Result<(), EventServiceError>;

    /// Closes the connection on the server.
    async fn unregister_all(&self) -> Result<(), EventServiceError>;

    /// Replaces the filter of a registered domain.
    async fn register_filter(
        &self,
        domain: &str,
        filter: &EventFilterSpec,
    ) -> Result<(), EventServiceError>;

    /// Removes the filter of a registered domain.
    async fn deregister_filter(&self, domain: &str) -> Result<(), EventServiceError>;

    /// Issues one polling listen call.
    async fn listen_polling(&self) -> Result<ListenResponse, EventServiceError>;

    /// Opens one streaming listen window.
    async fn listen_streaming(&self) -> Result<ChunkStream, EventServiceError>;

    /// Publishes an event.
    async fn send_event(&self, event: WireDomainEvent) -> Result<(), EventServiceError>;
}

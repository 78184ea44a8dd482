//! Client connector: strategy resolution and listen call handling on top of
//! an [`EventServiceTransport`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::OnceCell;

use super::transport::EventServiceTransport;
use crate::api::dto::InitResponse;
use crate::codec::{EventCodec, FrameDecoder, StreamFrame};
use crate::config::ConnectionStrategy;
use crate::domain::{Domain, DomainEvent, Event, EventFilterSpec, UserId};
use crate::error::EventServiceError;

/// Receives the outcome of listen calls.
pub trait EventNotification: Send + Sync {
    /// A batch of events arrived.
    fn on_notify(&self, events: Vec<DomainEvent>);

    /// The server no longer knows this client.
    fn on_abort(&self);
}

/// Client half of a connection strategy.
#[async_trait]
pub trait RemoteEventConnector: Send + Sync + fmt::Debug {
    /// Connects to the server. Only the first call does anything.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the init call.
    async fn init(&self) -> Result<(), EventServiceError>;

    /// Returns `true` once [`RemoteEventConnector::init`] succeeded.
    fn is_initialized(&self) -> bool;

    /// Runs one listen call, reporting batches and aborts to `notification`.
    ///
    /// An abort is reported through [`EventNotification::on_abort`] and ends
    /// the call with `Ok`.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`EventServiceError::Serialization`] for
    /// payloads the codec rejects.
    async fn listen(&self, notification: &dyn EventNotification) -> Result<(), EventServiceError>;

    /// Registers the client for `domain`.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    async fn activate(
        &self,
        domain: &Domain,
        filter: Option<&EventFilterSpec>,
    ) -> Result<(), EventServiceError>;

    /// Unregisters several domains in one call.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    async fn deactivate(&self, domains: &[Domain]) -> Result<(), EventServiceError>;

    /// Closes the connection on the server.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    async fn deactivate_all(&self) -> Result<(), EventServiceError>;

    /// Replaces the filter of an active domain.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    async fn register_event_filter(
        &self,
        domain: &Domain,
        filter: &EventFilterSpec,
    ) -> Result<(), EventServiceError>;

    /// Removes the filter of an active domain.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    async fn deregister_event_filter(&self, domain: &Domain) -> Result<(), EventServiceError>;

    /// Publishes an event.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Serialization`] if the codec rejects the
    /// event, otherwise the transport error.
    async fn send_event(&self, domain: &Domain, event: Event) -> Result<(), EventServiceError>;
}

/// Connection facts learned on init.
#[derive(Debug, Clone)]
struct Session {
    connection_id: UserId,
    strategy: ConnectionStrategy,
}

/// [`RemoteEventConnector`] over any [`EventServiceTransport`].
///
/// The strategy is resolved once on init: streaming only if the server
/// prefers it and the transport can read a response incrementally.
#[derive(Debug)]
pub struct DefaultClientConnector {
    transport: Arc<dyn EventServiceTransport>,
    codec: EventCodec,
    session: OnceCell<Session>,
}

impl DefaultClientConnector {
    /// Creates an uninitialized connector.
    #[must_use]
    pub fn new(transport: Arc<dyn EventServiceTransport>, codec: EventCodec) -> Self {
        Self {
            transport,
            codec,
            session: OnceCell::new(),
        }
    }

    /// Returns the resolved strategy, once initialized.
    #[must_use]
    pub fn strategy(&self) -> Option<ConnectionStrategy> {
        self.session.get().map(|s| s.strategy)
    }

    /// Returns the connection id, once initialized.
    #[must_use]
    pub fn connection_id(&self) -> Option<&UserId> {
        self.session.get().map(|s| &s.connection_id)
    }

    fn session(&self) -> Result<&Session, EventServiceError> {
        self.session
            .get()
            .ok_or_else(|| EventServiceError::InvalidRequest("connector not initialized".to_string()))
    }

    fn resolve(&self, init: &InitResponse) -> Session {
        let strategy = match init.strategy {
            ConnectionStrategy::Streaming if self.transport.supports_streaming() => {
                ConnectionStrategy::Streaming
            }
            ConnectionStrategy::Streaming => {
                tracing::info!("transport cannot stream, falling back to polling");
                ConnectionStrategy::Polling
            }
            ConnectionStrategy::Polling => ConnectionStrategy::Polling,
        };
        Session {
            connection_id: UserId::new(&init.connection_id),
            strategy,
        }
    }

    async fn listen_polling(&self, notification: &dyn EventNotification) -> Result<(), EventServiceError> {
        let response = self.transport.listen_polling().await?;
        let events = self.codec.decode_all(response.events)?;
        notification.on_notify(events);
        Ok(())
    }

    async fn listen_streaming(&self, notification: &dyn EventNotification) -> Result<(), EventServiceError> {
        let mut chunks = self.transport.listen_streaming().await?;
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = chunks.next().await {
            for frame in decoder.push(&chunk?)? {
                match frame {
                    StreamFrame::Events { events } => {
                        notification.on_notify(self.codec.decode_all(events)?);
                    }
                    StreamFrame::KeepAlive => {}
                    StreamFrame::Cycle => return Ok(()),
                    StreamFrame::Abort { reason } => {
                        return Err(EventServiceError::UnknownUser(reason));
                    }
                }
            }
        }
        // Closed without a cycle frame, e.g. by a proxy timeout.
        Err(EventServiceError::TransientTransport(
            "stream closed before the window ended".to_string(),
        ))
    }
}

#[async_trait]
impl RemoteEventConnector for DefaultClientConnector {
    async fn init(&self) -> Result<(), EventServiceError> {
        self.session
            .get_or_try_init(|| async {
                let init = self.transport.init().await?;
                let session = self.resolve(&init);
                tracing::info!(
                    connection_id = %session.connection_id,
                    strategy = %session.strategy,
                    "event service connector initialized"
                );
                Ok::<_, EventServiceError>(session)
            })
            .await?;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.session.initialized()
    }

    async fn listen(&self, notification: &dyn EventNotification) -> Result<(), EventServiceError> {
        let result = match self.session()?.strategy {
            ConnectionStrategy::Polling => self.listen_polling(notification).await,
            ConnectionStrategy::Streaming => self.listen_streaming(notification).await,
        };
        match result {
            Err(EventServiceError::UnknownUser(reason)) => {
                tracing::info!(reason = %reason, "server dropped this connection");
                notification.on_abort();
                Ok(())
            }
            other => other,
        }
    }

    async fn activate(
        &self,
        domain: &Domain,
        filter: Option<&EventFilterSpec>,
    ) -> Result<(), EventServiceError> {
        self.session()?;
        self.transport.register(domain.name(), filter).await
    }

    async fn deactivate(&self, domains: &[Domain]) -> Result<(), EventServiceError> {
        self.session()?;
        let names: Vec<String> = domains.iter().map(|d| d.name().to_string()).collect();
        self.transport.unregister(&names).await
    }

    async fn deactivate_all(&self) -> Result<(), EventServiceError> {
        self.session()?;
        self.transport.unregister_all().await
    }

    async fn register_event_filter(
        &self,
        domain: &Domain,
        filter: &EventFilterSpec,
    ) -> Result<(), EventServiceError> {
        self.session()?;
        self.transport.register_filter(domain.name(), filter).await
    }

    async fn deregister_event_filter(&self, domain: &Domain) -> Result<(), EventServiceError> {
        self.session()?;
        self.transport.deregister_filter(domain.name()).await
    }

    async fn send_event(&self, domain: &Domain, event: Event) -> Result<(), EventServiceError> {
        self.session()?;
        let wire = self.codec.encode(&DomainEvent::new(domain.clone(), event))?;
        self.transport.send_event(wire).await
    }
}

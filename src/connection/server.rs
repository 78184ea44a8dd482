//! Server connectors: turn registry listen results into wire responses.
//!
//! Both strategies share the same registry contract and differ only in how
//! a batch leaves the server:
//!
//! - polling: one [`ListenResponse`] per request,
//! - streaming: one response body per connection window, one
//!   [`StreamFrame`] per line.

use futures_util::Stream;
use tokio::time::Instant;

use crate::codec::{EventCodec, ListenResponse, StreamFrame};
use crate::config::ConnectionStrategy;
use crate::domain::UserId;
use crate::error::EventServiceError;
use crate::registry::EventRegistry;

/// Connector answering each listen call with a single batch.
#[derive(Debug, Clone)]
pub struct PollingServerConnector {
    registry: EventRegistry,
    codec: EventCodec,
}

impl PollingServerConnector {
    /// Creates a polling connector.
    #[must_use]
    pub const fn new(registry: EventRegistry, codec: EventCodec) -> Self {
        Self { registry, codec }
    }

    /// Waits for the next batch of `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates registry errors and [`EventServiceError::Serialization`]
    /// if an event is rejected by the codec.
    pub async fn listen(&self, user_id: &UserId) -> Result<ListenResponse, EventServiceError> {
        let events = self.registry.listen(user_id).await?;
        Ok(ListenResponse {
            events: self.codec.encode_all(&events)?,
        })
    }
}

/// Connector holding one response open for a whole connection window.
#[derive(Debug, Clone)]
pub struct StreamingServerConnector {
    registry: EventRegistry,
    codec: EventCodec,
}

impl StreamingServerConnector {
    /// Creates a streaming connector.
    #[must_use]
    pub const fn new(registry: EventRegistry, codec: EventCodec) -> Self {
        Self { registry, codec }
    }

    /// Streams frames for `user_id` until the window of `max_waiting_time`
    /// closes.
    ///
    /// The first frame is a keep-alive so the client sees the connection is
    /// open. Every batch becomes an `events` frame; the window ends with a
    /// `cycle` frame. An unknown user ends the stream with an `abort` frame;
    /// any other failure ends it with an error item.
    pub fn listen(
        &self,
        user_id: UserId,
    ) -> impl Stream<Item = Result<String, EventServiceError>> + Send + 'static {
        let registry = self.registry.clone();
        let codec = self.codec.clone();
        let window_end = Instant::now() + registry.config().max_waiting_time;

        async_stream::stream! {
            yield StreamFrame::KeepAlive.to_line();
            loop {
                match registry.listen_until(&user_id, window_end).await {
                    Ok(events) if events.is_empty() => {
                        tracing::trace!(user_id = %user_id, "streaming window closed");
                        yield StreamFrame::Cycle.to_line();
                        break;
                    }
                    Ok(events) => match codec.encode_all(&events) {
                        Ok(events) => {
                            yield StreamFrame::Events { events }.to_line();
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    },
                    Err(EventServiceError::UnknownUser(reason)) => {
                        tracing::debug!(user_id = %user_id, "streaming listen aborted");
                        yield StreamFrame::Abort { reason }.to_line();
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "streaming listen failed");
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

/// The connector selected for one listen call.
#[derive(Debug, Clone)]
pub enum ServerConnector {
    /// Single batch per call.
    Polling(PollingServerConnector),
    /// Chunked frames per connection window.
    Streaming(StreamingServerConnector),
}

impl ServerConnector {
    /// Builds the connector for `strategy`.
    #[must_use]
    pub fn new(strategy: ConnectionStrategy, registry: EventRegistry, codec: EventCodec) -> Self {
        match strategy {
            ConnectionStrategy::Polling => Self::Polling(PollingServerConnector::new(registry, codec)),
            ConnectionStrategy::Streaming => {
                Self::Streaming(StreamingServerConnector::new(registry, codec))
            }
        }
    }

    /// Returns the strategy this connector implements.
    #[must_use]
    pub const fn strategy(&self) -> ConnectionStrategy {
        match self {
            Self::Polling(_) => ConnectionStrategy::Polling,
            Self::Streaming(_) => ConnectionStrategy::Streaming,
        }
    }
}

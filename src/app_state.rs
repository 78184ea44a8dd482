//! Shared application state injected into all Axum handlers.

use crate::codec::EventCodec;
use crate::config::{ConnectionStrategy, EventServiceConfig};
use crate::connection::{ConnectionIdGenerator, ServerConnector};
use crate::registry::EventRegistry;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Event registry holding every connected user.
    pub registry: EventRegistry,
    /// Assigns and resolves connection ids.
    pub id_generator: ConnectionIdGenerator,
    /// Codec used to encode listen responses and decode published events.
    pub codec: EventCodec,
}

impl AppState {
    /// Builds the state for `config` with a permissive codec.
    #[must_use]
    pub fn new(config: EventServiceConfig) -> Self {
        let id_generator = ConnectionIdGenerator::from(config.connection_id_strategy);
        Self {
            registry: EventRegistry::new(config),
            id_generator,
            codec: EventCodec::permissive(),
        }
    }

    /// Replaces the codec, e.g. to restrict the accepted event types.
    #[must_use]
    pub fn with_codec(mut self, codec: EventCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EventServiceConfig {
        self.registry.config()
    }

    /// Returns the connector for `strategy`, or for the configured strategy.
    #[must_use]
    pub fn connector(&self, strategy: Option<ConnectionStrategy>) -> ServerConnector {
        ServerConnector::new(
            strategy.unwrap_or(self.config().connection_strategy),
            self.registry.clone(),
            self.codec.clone(),
        )
    }
}

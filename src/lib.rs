//! # event-gateway
//!
//! Domain-scoped server push over a pull-only transport.
//!
//! Clients subscribe to named scopes ("domains"); publishers add events to
//! a domain; every subscribed client receives each event through a listen
//! call the server holds open until there is something to deliver or a
//! keep-alive window elapses. Idle clients are evicted by a background
//! scheduler so that silently vanished clients never leak queues.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)                     RemoteEventService (client/)
//!     │                                   │
//!     ├── REST Handlers (api/)            ├── DefaultClientConnector
//!     ├── Server connectors               └── HttpTransport (reqwest)
//!     │   polling / streaming (connection/)
//!     │
//!     ├── EventRegistry (registry/)
//!     │   ├── UserManager + UserActivityScheduler
//!     │   └── DomainUserMapping
//!     │
//!     └── Domains, events, filters (domain/), wire codec (codec)
//! ```
//!
//! ## Embedding
//!
//! The registry works without the HTTP layer:
//!
//! ```
//! # async fn demo() -> Result<(), event_gateway::error::EventServiceError> {
//! use event_gateway::config::EventServiceConfig;
//! use event_gateway::domain::{Domain, Event, UserId};
//! use event_gateway::registry::EventRegistry;
//!
//! let registry = EventRegistry::new(EventServiceConfig::default());
//! let user = UserId::new("alice");
//! let chat = Domain::new("chat")?;
//! registry.register(&user, chat.clone(), None);
//! registry.add_event(&chat, Event::new("message", serde_json::json!({ "text": "hi" })))?;
//! let events = registry.listen(&user).await?;
//! assert_eq!(events.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod app_state;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod registry;

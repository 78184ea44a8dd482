//! Client side of the event service.
//!
//! ```text
//! RemoteEventService ── listeners per domain, listen loop
//!     └── RemoteEventConnector (DefaultClientConnector) ── strategy, codec
//!             └── EventServiceTransport (HttpTransport) ── wire calls
//! ```

pub mod connector;
#[cfg(feature = "http-client")]
pub mod http_transport;
pub mod listener;
pub mod remote_event_service;
pub mod transport;

pub use connector::{DefaultClientConnector, EventNotification, RemoteEventConnector};
#[cfg(feature = "http-client")]
pub use http_transport::HttpTransport;
pub use listener::{FnListener, RemoteEventListener, UnlistenEventListener};
pub use remote_event_service::{RemoteEventService, SharedListener};
pub use transport::{ChunkStream, EventServiceTransport};

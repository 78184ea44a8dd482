//! Server-side connection handling: how clients are identified and how
//! listen results reach them.
//!
//! The client-side counterpart lives in [`crate::client`].

pub mod id_generator;
pub mod server;

pub use id_generator::{CONNECTION_ID_HEADER, ConnectionIdGenerator, SESSION_ID_HEADER};
pub use server::{PollingServerConnector, ServerConnector, StreamingServerConnector};

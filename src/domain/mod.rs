//! Domain layer: scopes, events, filters and user identity.
//!
//! These are the value types everything else is built on. They carry no
//! behavior beyond validation and conversion.

pub mod domain_event;
pub mod event;
pub mod event_domain;
pub mod filter;
pub mod unlisten;
pub mod user_id;

pub use domain_event::DomainEvent;
pub use event::{Event, EventPayload};
pub use event_domain::{Domain, DomainFactory, UNLISTEN_DOMAIN_NAME, USER_SPECIFIC_DOMAIN_NAME};
pub use filter::{EventFilter, EventFilterSpec, FnFilter, SharedEventFilter};
pub use unlisten::UnlistenEvent;
pub use user_id::UserId;

//! Data Transfer Objects for REST request/response serialization.

pub mod event_service_dto;

pub use event_service_dto::*;

//! REST endpoint handlers organized by resource.

pub mod event_service;
pub mod system;

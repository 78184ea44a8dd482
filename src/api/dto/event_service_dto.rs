//! Request and response bodies of the `/eventservice` endpoints.
//!
//! Shared by the axum handlers and the HTTP client transport.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::config::ConnectionStrategy;
use crate::domain::EventFilterSpec;

/// Response body for `POST /eventservice/init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InitResponse {
    /// Id the client sends back on every later request.
    pub connection_id: String,
    /// Header the id travels in.
    pub connection_header: String,
    /// Strategy the server prefers.
    pub strategy: ConnectionStrategy,
    /// Coalescing window of a listen call in milliseconds.
    pub min_waiting_time_ms: u64,
    /// Keep-alive window of a listen call in milliseconds.
    pub max_waiting_time_ms: u64,
    /// Inactivity timeout in milliseconds.
    pub timeout_time_ms: u64,
}

/// Request body for `POST /eventservice/register`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Domain name.
    pub domain: String,
    /// Optional filter for the domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub filter: Option<EventFilterSpec>,
}

/// Request body for `POST /eventservice/register-all`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterAllRequest {
    /// Domain names.
    pub domains: Vec<String>,
    /// Optional filter applied to every domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub filter: Option<EventFilterSpec>,
}

/// Request body for `POST /eventservice/unregister`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnregisterRequest {
    /// Domain name.
    pub domain: String,
}

/// Request body for `POST /eventservice/unregister-all`.
///
/// Without `domains` the connection is closed entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UnregisterAllRequest {
    /// Domain names, or `None` for all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

/// Request body for `POST /eventservice/filter`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FilterRequest {
    /// Registered domain name.
    pub domain: String,
    /// New filter.
    #[schema(value_type = Object)]
    pub filter: EventFilterSpec,
}

/// Query parameters of `GET /eventservice/listen`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListenQuery {
    /// Strategy override; defaults to the server's configured strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ConnectionStrategy>,
}

/// Request body for `POST /eventservice/events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PublishEventRequest {
    /// Target domain. Ignored when `user_id` is set.
    pub domain: String,
    /// Payload type discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload body.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// Routes the event to one user on the user-specific domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Response body for `POST /eventservice/events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublishEventResponse {
    /// Number of queues the event was added to.
    pub delivered: usize,
}

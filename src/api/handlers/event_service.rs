//! Event service endpoints: connection setup, subscriptions, listen and
//! publish.
//!
//! Every endpoint except `init` identifies the caller through the header of
//! the configured [`ConnectionIdGenerator`](crate::connection::ConnectionIdGenerator).

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::api::dto::{
    FilterRequest, InitResponse, ListenQuery, PublishEventRequest, PublishEventResponse,
    RegisterAllRequest, RegisterRequest, UnregisterAllRequest, UnregisterRequest,
};
use crate::app_state::AppState;
use crate::codec::{ListenResponse, WireDomainEvent};
use crate::connection::ServerConnector;
use crate::domain::{Event, EventFilterSpec, UserId};
use crate::error::{ErrorResponse, EventServiceError};

/// Content type of streaming listen responses.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `POST /eventservice/init`: Open a connection.
///
/// # Errors
///
/// Returns [`EventServiceError::InvalidRequest`] if the session generator is
/// configured and no session header was sent.
#[utoipa::path(
    post,
    path = "/eventservice/init",
    tag = "EventService",
    summary = "Open a connection",
    description = "Assigns the connection id and returns the server's timing and preferred connection strategy.",
    responses(
        (status = 200, description = "Connection opened", body = InitResponse),
        (status = 400, description = "Missing session header", body = ErrorResponse),
    )
)]
pub async fn init(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<InitResponse>, EventServiceError> {
    let user_id = state.id_generator.generate(&headers)?;
    let config = state.config();
    tracing::debug!(user_id = %user_id, "connection initialized");
    Ok(Json(InitResponse {
        connection_id: user_id.to_string(),
        connection_header: state.id_generator.header_name().to_string(),
        strategy: config.connection_strategy,
        min_waiting_time_ms: millis(config.min_waiting_time),
        max_waiting_time_ms: millis(config.max_waiting_time),
        timeout_time_ms: millis(config.timeout_time),
    }))
}

/// `POST /eventservice/register`: Register to a domain.
///
/// # Errors
///
/// Returns [`EventServiceError::InvalidRequest`] for a missing connection id
/// or an empty domain name.
#[utoipa::path(
    post,
    path = "/eventservice/register",
    tag = "EventService",
    summary = "Register to a domain",
    request_body = RegisterRequest,
    responses(
        (status = 204, description = "Registered"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<StatusCode, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    let domain = state.registry.domain(&req.domain)?;
    state
        .registry
        .register(&user_id, domain, req.filter.map(EventFilterSpec::into_shared));
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /eventservice/register-all`: Register to several domains.
///
/// # Errors
///
/// Returns [`EventServiceError::InvalidRequest`] for a missing connection id
/// or an empty domain name; nothing is registered in that case.
#[utoipa::path(
    post,
    path = "/eventservice/register-all",
    tag = "EventService",
    summary = "Register to several domains",
    request_body = RegisterAllRequest,
    responses(
        (status = 204, description = "Registered"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn register_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterAllRequest>,
) -> Result<StatusCode, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    let domains = req
        .domains
        .iter()
        .map(|name| state.registry.domain(name))
        .collect::<Result<Vec<_>, _>>()?;
    state
        .registry
        .register_all(&user_id, domains, req.filter.map(EventFilterSpec::into_shared));
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /eventservice/unregister`: Unregister from a domain.
///
/// # Errors
///
/// Returns [`EventServiceError::InvalidRequest`] for a missing connection id
/// or an empty domain name.
#[utoipa::path(
    post,
    path = "/eventservice/unregister",
    tag = "EventService",
    summary = "Unregister from a domain",
    request_body = UnregisterRequest,
    responses(
        (status = 204, description = "Unregistered"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn unregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UnregisterRequest>,
) -> Result<StatusCode, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    let domain = state.registry.domain(&req.domain)?;
    state.registry.unregister(&user_id, &domain);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /eventservice/unregister-all`: Unregister from several domains, or
/// close the connection when no domains are given.
///
/// # Errors
///
/// Returns [`EventServiceError::InvalidRequest`] for a missing connection id
/// or an empty domain name.
#[utoipa::path(
    post,
    path = "/eventservice/unregister-all",
    tag = "EventService",
    summary = "Unregister from several domains or close the connection",
    request_body = UnregisterAllRequest,
    responses(
        (status = 204, description = "Unregistered"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn unregister_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UnregisterAllRequest>,
) -> Result<StatusCode, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    match req.domains {
        Some(names) => {
            let domains = names
                .iter()
                .map(|name| state.registry.domain(name))
                .collect::<Result<Vec<_>, _>>()?;
            state.registry.unregister_all(&user_id, &domains);
        }
        None => {
            if state.registry.unregister_user(&user_id) {
                tracing::debug!(user_id = %user_id, "connection closed by client");
            }
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /eventservice/filter`: Replace the filter of a registered domain.
///
/// # Errors
///
/// Returns [`EventServiceError::UnknownUser`] for an unknown connection and
/// [`EventServiceError::InvalidRequest`] if the domain is not registered.
#[utoipa::path(
    post,
    path = "/eventservice/filter",
    tag = "EventService",
    summary = "Set a domain filter",
    request_body = FilterRequest,
    responses(
        (status = 204, description = "Filter set"),
        (status = 400, description = "Domain not registered", body = ErrorResponse),
        (status = 410, description = "Unknown connection", body = ErrorResponse),
    )
)]
pub async fn register_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FilterRequest>,
) -> Result<StatusCode, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    let domain = state.registry.domain(&req.domain)?;
    state
        .registry
        .register_event_filter(&user_id, &domain, req.filter.into_shared())?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /eventservice/filter/{domain}`: Remove the filter of a domain.
///
/// # Errors
///
/// Same as [`register_filter`].
#[utoipa::path(
    delete,
    path = "/eventservice/filter/{domain}",
    tag = "EventService",
    summary = "Remove a domain filter",
    params(("domain" = String, Path, description = "Registered domain name")),
    responses(
        (status = 204, description = "Filter removed"),
        (status = 400, description = "Domain not registered", body = ErrorResponse),
        (status = 410, description = "Unknown connection", body = ErrorResponse),
    )
)]
pub async fn deregister_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Result<StatusCode, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    let domain = state.registry.domain(&domain)?;
    state.registry.deregister_event_filter(&user_id, &domain)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /eventservice/listen`: Wait for events.
///
/// Polling answers with one JSON batch. Streaming answers with
/// newline-delimited frames until the connection window closes.
///
/// # Errors
///
/// Returns [`EventServiceError::UnknownUser`] (410) when the connection is
/// unknown or was evicted; the client has to start over.
#[utoipa::path(
    get,
    path = "/eventservice/listen",
    tag = "EventService",
    summary = "Wait for events",
    params(ListenQuery),
    responses(
        (status = 200, description = "Event batch (polling) or frame stream (streaming)", body = ListenResponse),
        (status = 400, description = "Another listen call is in progress", body = ErrorResponse),
        (status = 410, description = "Unknown connection", body = ErrorResponse),
    )
)]
pub async fn listen(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListenQuery>,
) -> Result<Response, EventServiceError> {
    let user_id = state.id_generator.resolve(&headers)?;
    match state.connector(query.strategy) {
        ServerConnector::Polling(connector) => {
            Ok(Json(connector.listen(&user_id).await?).into_response())
        }
        ServerConnector::Streaming(connector) => {
            // Fail fast with a status code instead of an abort frame.
            state.registry.user_manager().require_user(&user_id)?;
            let body = Body::from_stream(connector.listen(user_id));
            Ok((
                [
                    (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response())
        }
    }
}

/// `POST /eventservice/events`: Publish an event.
///
/// # Errors
///
/// Returns [`EventServiceError::Serialization`] if the event type is not
/// accepted, [`EventServiceError::InvalidRequest`] for the user-specific
/// domain without a target user, and [`EventServiceError::UnknownUser`] for
/// an unknown target user.
#[utoipa::path(
    post,
    path = "/eventservice/events",
    tag = "EventService",
    summary = "Publish an event",
    request_body = PublishEventRequest,
    responses(
        (status = 200, description = "Event queued", body = PublishEventResponse),
        (status = 400, description = "Rejected event", body = ErrorResponse),
        (status = 410, description = "Unknown target user", body = ErrorResponse),
    )
)]
pub async fn publish_event(
    State(state): State<AppState>,
    Json(req): Json<PublishEventRequest>,
) -> Result<Json<PublishEventResponse>, EventServiceError> {
    let wire = WireDomainEvent {
        domain: req.domain,
        event_type: req.event_type,
        data: req.data,
    };
    let delivered = match req.user_id {
        Some(user_id) => {
            if !state.codec.allows(&wire.event_type) {
                return Err(EventServiceError::Serialization(format!(
                    "event type `{}` is not in the allow-list",
                    wire.event_type
                )));
            }
            let event = Event::new(wire.event_type, wire.data);
            state.registry.add_user_event(&UserId::new(user_id), event)?;
            1
        }
        None => {
            let decoded = state.codec.decode(wire)?;
            let domain = state.registry.domain(decoded.domain.name())?;
            state.registry.add_event(&domain, decoded.event)?
        }
    };
    Ok(Json(PublishEventResponse { delivered }))
}

/// Event service routes mounted under `/eventservice`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/init", post(init))
        .route("/register", post(register))
        .route("/register-all", post(register_all))
        .route("/unregister", post(unregister))
        .route("/unregister-all", post(unregister_all))
        .route("/filter", post(register_filter))
        .route("/filter/{domain}", delete(deregister_filter))
        .route("/listen", get(listen))
        .route("/events", post(publish_event))
}

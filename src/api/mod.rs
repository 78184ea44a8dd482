//! HTTP layer: route handlers, DTOs, OpenAPI document and router
//! composition.
//!
//! Event service endpoints are mounted under `/eventservice`, system
//! endpoints at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document of all endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "event-gateway", description = "Domain-scoped server push over long-polling and streaming HTTP"),
    paths(
        handlers::event_service::init,
        handlers::event_service::register,
        handlers::event_service::register_all,
        handlers::event_service::unregister,
        handlers::event_service::unregister_all,
        handlers::event_service::register_filter,
        handlers::event_service::deregister_filter,
        handlers::event_service::listen,
        handlers::event_service::publish_event,
        handlers::system::health_handler,
    ),
    tags(
        (name = "EventService", description = "Subscriptions, listen cycle and publishing"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the router with all endpoints, without state.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/eventservice", handlers::event_service::routes())
        .merge(handlers::system::routes())
}

/// Builds the complete application: routes, optional Swagger UI, tracing
/// and CORS layers, bound to `state`.
pub fn build_app(state: AppState) -> Router {
    let router = build_router();
    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );
    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route(
        "/api-docs/openapi.json",
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    );
    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::api::dto::{InitResponse, PublishEventResponse};
    use crate::codec::{EventCodec, ListenResponse, StreamFrame};
    use crate::config::{ConnectionIdStrategy, EventServiceConfig};
    use crate::connection::{CONNECTION_ID_HEADER, SESSION_ID_HEADER};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(max_ms: u64) -> AppState {
        let Ok(config) = EventServiceConfig::new(
            Duration::ZERO,
            Duration::from_millis(max_ms),
            Duration::from_secs(90),
        ) else {
            panic!("valid config");
        };
        AppState::new(config)
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let Ok(response) = app.clone().oneshot(request).await else {
            panic!("router is infallible");
        };
        let status = response.status();
        let Ok(body) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body readable");
        };
        (status, body.to_vec())
    }

    fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
        let Ok(value) = serde_json::from_slice(body) else {
            panic!("unexpected body: {}", String::from_utf8_lossy(body));
        };
        value
    }

    fn post(uri: &str, id: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(id) = id {
            builder = builder.header(CONNECTION_ID_HEADER, id);
        }
        let Ok(request) = builder.body(Body::from(body.to_string())) else {
            panic!("valid request");
        };
        request
    }

    fn get(uri: &str, id: &str) -> Request<Body> {
        let Ok(request) = Request::get(uri)
            .header(CONNECTION_ID_HEADER, id)
            .body(Body::empty())
        else {
            panic!("valid request");
        };
        request
    }

    async fn connect(app: &Router) -> String {
        let (status, body) = call(app, post("/eventservice/init", None, serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let init: InitResponse = parse(&body);
        assert_eq!(init.connection_header, CONNECTION_ID_HEADER);
        init.connection_id
    }

    #[tokio::test]
    async fn publish_then_poll_delivers_once() {
        let app = build_app(state(20_000));
        let id = connect(&app).await;

        let (status, _) = call(
            &app,
            post("/eventservice/register", Some(&id), serde_json::json!({ "domain": "chat" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(
            &app,
            post(
                "/eventservice/events",
                None,
                serde_json::json!({ "domain": "chat", "type": "message", "data": { "text": "M1" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<PublishEventResponse>(&body).delivered, 1);

        let (status, body) = call(&app, get("/eventservice/listen", &id)).await;
        assert_eq!(status, StatusCode::OK);
        let response: ListenResponse = parse(&body);
        assert_eq!(response.events.len(), 1);
        assert_eq!(response.events.first().map(|e| e.event_type.as_str()), Some("message"));
    }

    #[tokio::test]
    async fn unknown_connection_listen_is_gone() {
        let app = build_app(state(20_000));
        let (status, body) = call(&app, get("/eventservice/listen", "nobody")).await;
        assert_eq!(status, StatusCode::GONE);
        let error: crate::error::ErrorResponse = parse(&body);
        assert_eq!(error.error.code, 2001);
    }

    #[tokio::test]
    async fn missing_connection_header_is_bad_request() {
        let app = build_app(state(20_000));
        let (status, _) = call(
            &app,
            post("/eventservice/register", None, serde_json::json!({ "domain": "chat" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn filters_are_applied_and_removed_over_http() {
        let app = build_app(state(20_000));
        let id = connect(&app).await;
        let _ = call(
            &app,
            post(
                "/eventservice/register",
                Some(&id),
                serde_json::json!({ "domain": "chat", "filter": { "kind": "event_type", "types": ["keep"] } }),
            ),
        )
        .await;

        let publish = |event_type: &str| {
            post(
                "/eventservice/events",
                None,
                serde_json::json!({ "domain": "chat", "type": event_type, "data": null }),
            )
        };
        let (_, body) = call(&app, publish("drop")).await;
        assert_eq!(parse::<PublishEventResponse>(&body).delivered, 0);

        let Ok(request) = Request::delete("/eventservice/filter/chat")
            .header(CONNECTION_ID_HEADER, id.as_str())
            .body(Body::empty())
        else {
            panic!("valid request");
        };
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = call(&app, publish("drop")).await;
        assert_eq!(parse::<PublishEventResponse>(&body).delivered, 1);
    }

    #[tokio::test]
    async fn closing_the_connection_forgets_the_user() {
        let app = build_app(state(20_000));
        let id = connect(&app).await;
        let _ = call(
            &app,
            post("/eventservice/register", Some(&id), serde_json::json!({ "domain": "chat" })),
        )
        .await;
        let (status, _) = call(&app, post("/eventservice/unregister-all", Some(&id), serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, get("/eventservice/listen", &id)).await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn user_specific_publish_needs_known_user() {
        let app = build_app(state(20_000));
        let (status, _) = call(
            &app,
            post(
                "/eventservice/events",
                None,
                serde_json::json!({ "domain": "x", "type": "t", "data": 1, "user_id": "ghost" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn restricted_codec_rejects_unknown_types() {
        let app = build_app(state(20_000).with_codec(EventCodec::new().allow("known")));
        let (status, _) = call(
            &app,
            post(
                "/eventservice/events",
                None,
                serde_json::json!({ "domain": "chat", "type": "unknown", "data": null }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_listen_returns_ndjson_frames() {
        let app = build_app(state(1_000));
        let id = connect(&app).await;
        let _ = call(
            &app,
            post("/eventservice/register", Some(&id), serde_json::json!({ "domain": "chat" })),
        )
        .await;
        let _ = call(
            &app,
            post(
                "/eventservice/events",
                None,
                serde_json::json!({ "domain": "chat", "type": "message", "data": 1 }),
            ),
        )
        .await;

        let (status, body) = call(&app, get("/eventservice/listen?strategy=streaming", &id)).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8_lossy(&body).to_string();
        let frames: Vec<StreamFrame> = text
            .lines()
            .filter_map(|line| StreamFrame::parse_line(line).ok())
            .collect();
        assert_eq!(frames.first(), Some(&StreamFrame::KeepAlive));
        assert!(matches!(frames.get(1), Some(StreamFrame::Events { events }) if events.len() == 1));
        assert_eq!(frames.last(), Some(&StreamFrame::Cycle));
    }

    #[tokio::test]
    async fn session_generator_uses_session_header() {
        let Ok(mut config) = EventServiceConfig::new(
            Duration::ZERO,
            Duration::from_secs(20),
            Duration::from_secs(90),
        ) else {
            panic!("valid config");
        };
        config.connection_id_strategy = ConnectionIdStrategy::Session;
        let app = build_app(AppState::new(config));

        let Ok(request) = Request::post("/eventservice/init")
            .header(SESSION_ID_HEADER, "sess-42")
            .body(Body::empty())
        else {
            panic!("valid request");
        };
        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let init: InitResponse = parse(&body);
        assert_eq!(init.connection_id, "sess-42");
        assert_eq!(init.connection_header, SESSION_ID_HEADER);
    }

    #[tokio::test]
    async fn health_reports_registry_occupancy() {
        let app = build_app(state(20_000));
        let Ok(request) = Request::get("/health").body(Body::empty()) else {
            panic!("valid request");
        };
        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = parse(&body);
        assert_eq!(health.get("connected_users"), Some(&serde_json::json!(0)));
    }

    #[test]
    fn openapi_lists_event_service_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/eventservice/listen"));
        assert!(doc.paths.paths.contains_key("/eventservice/filter/{domain}"));
    }
}

pub mod dto;
pub mod errors;
pub mod handlers;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, put},
    Json, Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::hub;
use crate::state::AppState;
use handlers::ApiDoc;
use rate_limit::ClientIpKeyExtractor;

/// Assemble the full application router.
///
/// The rate limiter wraps only the `/api` surface; the health check, the
/// OpenAPI document and the WebSocket endpoints stay outside it. The
/// WebSocket upgrade is served both at `/` and at `/ws`.
pub fn router(state: AppState) -> Router {
    let (api_router, api_doc) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/api/sensors",
            get(handlers::list_sensors).post(handlers::create_sensor),
        )
        .route("/api/sensors/{id}", put(handlers::update_sensor))
        .route(
            "/api/rooms",
            get(handlers::list_rooms).post(handlers::create_room),
        )
        .route(
            "/api/readings",
            get(handlers::get_readings_feed).post(handlers::create_reading),
        )
        .route("/api/readings/{sensor_id}", get(handlers::get_sensor_readings))
        .route(
            "/api/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route("/api/settings/db", put(handlers::update_db_settings))
        .with_state(state.clone())
        .split_for_parts();

    let api_router = if state.config.rate_limit_disabled {
        api_router
    } else {
        let limiter = GovernorConfigBuilder::default()
            .key_extractor(ClientIpKeyExtractor)
            .period(Duration::from_secs(state.config.rate_limit_replenish_secs))
            .burst_size(state.config.rate_limit_burst)
            .finish()
            .expect("invalid rate limiter configuration");
        api_router.layer(GovernorLayer {
            config: Arc::new(limiter),
        })
    };

    Router::new()
        .route("/", get(hub::ws_handler))
        .route("/ws", get(hub::ws_handler))
        .route("/health", get(handlers::health))
        .with_state(state)
        .merge(api_router)
        .route(
            "/api-docs/openapi.json",
            get(move || async move { Json(api_doc) }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

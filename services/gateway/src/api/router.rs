use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::rate_limit_tenant;
use super::ApiState;

/// The stream route is long-lived and sits outside the request timeout.
/// Tenant-scoped routes, the stream included, share the per-tenant request
/// rate limit; admin and health routes are exempt.
pub fn create_router(state: Arc<ApiState>) -> Router {
    let bounded = ServiceBuilder::new().layer(TimeoutLayer::new(state.config.request_timeout()));
    let rate_limited = middleware::from_fn_with_state(Arc::clone(&state), rate_limit_tenant);

    let tenant_requests = Router::new()
        .route(
            "/api/tenants/:tenant_id/topic",
            post(handlers::provision_topic).delete(handlers::deprovision_topic),
        )
        .route("/api/tenants/:tenant_id/publish", post(handlers::publish))
        .route("/api/tenants/:tenant_id/usage", get(handlers::tenant_usage))
        .route_layer(rate_limited.clone());

    let requests = Router::new()
        .route("/api/admin/streams", get(handlers::list_streams))
        .route(
            "/api/admin/streams/:tenant_id/:connection_id",
            delete(handlers::close_stream),
        )
        .route("/api/admin/usage", get(handlers::global_usage))
        .route("/health", get(handlers::health_check))
        .merge(tenant_requests)
        .layer(bounded);

    let streaming = Router::new()
        .route(
            "/api/tenants/:tenant_id/stream",
            get(handlers::stream_events),
        )
        .route_layer(rate_limited);

    requests
        .merge(streaming)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

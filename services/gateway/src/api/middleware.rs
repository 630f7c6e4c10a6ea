use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::error::GatewayError;
use crate::ratelimit::RateDecision;
use crate::tenant::TenantId;

use super::handlers::gateway_error;
use super::ApiState;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Per-tenant request rate limit for tenant-scoped routes. Requests with a
/// malformed tenant id pass through so the handler can reject them.
pub async fn rate_limit_tenant(
    State(state): State<Arc<ApiState>>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(tenant_id) = params
        .get("tenant_id")
        .and_then(|raw| TenantId::parse(raw).ok())
    else {
        return next.run(request).await;
    };

    let limiter = &state.limiter;
    match limiter.check(tenant_id.as_str()) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                RATE_LIMIT_LIMIT_HEADER,
                HeaderValue::from(limiter.max_requests()),
            );
            headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { retry_after } => {
            let retry_after_secs =
                (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
            info!(
                %tenant_id,
                path = %request.uri().path(),
                retry_after_secs,
                "tenant request rate limited"
            );

            let mut response = gateway_error(GatewayError::RateLimited {
                limit: limiter.max_requests(),
                period_secs: limiter.period().as_secs(),
                retry_after_secs,
            })
            .into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert(
                RATE_LIMIT_LIMIT_HEADER,
                HeaderValue::from(limiter.max_requests()),
            );
            headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(0u32));
            response
        }
    }
}

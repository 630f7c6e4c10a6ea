use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::ledger::{current_day, UsageReport};
use crate::stream::StreamEvent;
use crate::tenant::TenantId;
use crate::tracker::ActiveStream;

use super::types::{
    ActiveStreamsResponse, CloseStreamResponse, ErrorResponse, PublishRequest, PublishResponse,
    StreamMessagePayload, TopicResponse, UsageQuery,
};
use super::ApiState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn provision_topic(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<TopicResponse> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let topic = state
        .gateway
        .provision_tenant(&tenant_id)
        .await
        .map_err(gateway_error)?;

    Ok(Json(TopicResponse {
        tenant_id: tenant_id.to_string(),
        topic,
        status: "created".to_string(),
        closed_streams: None,
    }))
}

pub async fn deprovision_topic(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<TopicResponse> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let closed = state
        .gateway
        .deprovision_tenant(&tenant_id)
        .await
        .map_err(gateway_error)?;

    Ok(Json(TopicResponse {
        tenant_id: tenant_id.to_string(),
        topic: tenant_id.topic_name(),
        status: "deleted".to_string(),
        closed_streams: Some(closed),
    }))
}

pub async fn publish(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> ApiResult<PublishResponse> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let Json(request) =
        payload.map_err(|rejection| bad_request("invalid_payload", &rejection.body_text()))?;

    let receipt = state
        .gateway
        .publish(&tenant_id, request.messages)
        .await
        .map_err(gateway_error)?;

    Ok(Json(PublishResponse {
        success: true,
        topic: receipt.topic,
        messages: receipt.messages,
        bytes: receipt.bytes,
    }))
}

pub async fn stream_events(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let session = state
        .gateway
        .open_stream(&tenant_id)
        .map_err(gateway_error)?;

    let events = session
        .into_stream()
        .map(|event| Ok::<_, Infallible>(sse_event(event)));

    let mut response = Sse::new(events).into_response();
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

fn sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Connected { .. } => Event::default().comment("connected"),
        StreamEvent::Message { value, timestamp } => {
            match serde_json::to_string(&StreamMessagePayload { value, timestamp }) {
                Ok(data) => Event::default().data(data),
                Err(err) => {
                    warn!(error = %err, "failed to encode stream message");
                    Event::default().comment("encoding error")
                }
            }
        }
        StreamEvent::Heartbeat { timestamp } => {
            Event::default().comment(format!("heartbeat {}", timestamp.timestamp()))
        }
        StreamEvent::Closed { reason } => {
            let data = serde_json::to_string(&reason)
                .unwrap_or_else(|_| format!(r#"{{"reason":"{}"}}"#, reason.as_str()));
            Event::default().event("end").data(data)
        }
    }
}

pub async fn tenant_usage(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<UsageReport> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let day = query.date.unwrap_or_else(current_day);
    let report = state
        .gateway
        .usage(&tenant_id, day)
        .map_err(gateway_error)?;
    Ok(Json(report))
}

pub async fn list_streams(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<ActiveStreamsResponse> {
    require_admin(&state, &headers)?;

    let streams = state.gateway.active_streams();
    let total = streams.len();
    let mut tenants: BTreeMap<String, Vec<ActiveStream>> = BTreeMap::new();
    for stream in streams {
        tenants
            .entry(stream.tenant_id.to_string())
            .or_default()
            .push(stream);
    }

    Ok(Json(ActiveStreamsResponse { total, tenants }))
}

pub async fn close_stream(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((tenant_id, connection_id)): Path<(String, String)>,
) -> ApiResult<CloseStreamResponse> {
    require_admin(&state, &headers)?;
    let tenant_id = parse_tenant(&tenant_id)?;
    let connection_id = Uuid::parse_str(&connection_id)
        .map_err(|_| bad_request("invalid_connection_id", "connection id must be a UUID"))?;

    if !state.gateway.close_stream(&tenant_id, connection_id) {
        return Err(not_found("stream_not_found", "no such active stream"));
    }
    Ok(Json(CloseStreamResponse { closed: true }))
}

pub async fn global_usage(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> ApiResult<UsageReport> {
    require_admin(&state, &headers)?;
    let day = query.date.unwrap_or_else(current_day);
    let report = state.gateway.global_usage(day).map_err(gateway_error)?;
    Ok(Json(report))
}

pub async fn health_check(State(state): State<Arc<ApiState>>) -> ApiResult<serde_json::Value> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "topic-gate-gateway",
        "active_streams": state.gateway.tracker().total_active(),
    })))
}

fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        error!("admin endpoint called but ADMIN_API_KEY is not configured");
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "admin_key_not_configured",
            "admin API key is not configured",
            None,
        ));
    };

    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected) {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid admin API key",
            None,
        ));
    }
    Ok(())
}

fn parse_tenant(raw: &str) -> Result<TenantId, ApiError> {
    TenantId::parse(raw).map_err(|err| gateway_error(err.into()))
}

pub(super) fn gateway_error(err: GatewayError) -> ApiError {
    let status = match &err {
        GatewayError::QuotaExceeded { .. }
        | GatewayError::ConnectionCapExceeded { .. }
        | GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::InvalidPayload(_) | GatewayError::InvalidTenant(_) => StatusCode::BAD_REQUEST,
        GatewayError::TopicNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::BrokerUnavailable(_)
        | GatewayError::Ledger(_)
        | GatewayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };

    let details = match &err {
        GatewayError::QuotaExceeded {
            scope,
            direction,
            resource,
            limit,
            current,
            requested,
        } => Some(json!({
            "scope": scope,
            "direction": direction,
            "resource": resource,
            "limit": limit,
            "current": current,
            "requested": requested,
        })),
        GatewayError::ConnectionCapExceeded { active, cap, .. } => Some(json!({
            "active": active,
            "cap": cap,
        })),
        GatewayError::PayloadTooLarge { index, size, limit } => Some(json!({
            "index": index,
            "size": size,
            "limit": limit,
        })),
        GatewayError::RateLimited {
            limit,
            period_secs,
            retry_after_secs,
        } => Some(json!({
            "limit": limit,
            "period_secs": period_secs,
            "retry_after_secs": retry_after_secs,
        })),
        _ => None,
    };

    if status.is_server_error() {
        warn!(code = err.code(), error = %err, "gateway request failed");
    }

    error_response(status, err.code(), &err.to_string(), details)
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: &str,
    details: Option<serde_json::Value>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details,
        }),
    )
}

fn bad_request(code: &str, message: &str) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, code, message, None)
}

fn not_found(code: &str, message: &str) -> ApiError {
    error_response(StatusCode::NOT_FOUND, code, message, None)
}

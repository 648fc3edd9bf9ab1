use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use sqlx::types::ipnetwork::IpNetwork;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::proctor_dto::{RecordEventRequest, RecordEventResponse, StartSessionRequest},
    error::Result,
    middleware::auth::AuthUser,
    services::proctor_service::EventSubmission,
    AppState,
};

/// First hop of `x-forwarded-for`, when it parses as an address.
fn client_ip(headers: &HeaderMap) -> Option<IpNetwork> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    first.parse::<IpAddr>().ok().map(IpNetwork::from)
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[utoipa::path(
    post,
    path = "/api/proctor/sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Proctoring session started", body = Json<serde_json::Value>),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt finalized or session already active")
    )
)]
#[axum::debug_handler]
pub async fn start_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(req): Json<StartSessionRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let session = state
        .proctor_service
        .start_session(
            req.attempt_id,
            user.id,
            req.settings,
            client_ip(&headers),
            user_agent(&headers),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[axum::debug_handler]
pub async fn end_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.proctor_service.end_session(id, user.id).await?;
    Ok(Json(session))
}

#[utoipa::path(
    post,
    path = "/api/proctor/sessions/{id}/events",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    request_body = RecordEventRequest,
    responses(
        (status = 201, description = "Event recorded", body = Json<RecordEventResponse>),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not active")
    )
)]
#[axum::debug_handler]
pub async fn record_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordEventRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let appended = state
        .proctor_service
        .record_event(
            id,
            user.id,
            EventSubmission {
                event_type: req.event_type,
                severity: req.severity,
                occurred_at: req.occurred_at,
                details: req.details,
                snapshot_url: req.snapshot_url,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RecordEventResponse::from(appended)),
    ))
}

#[axum::debug_handler]
pub async fn get_session_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let timeline = state
        .proctor_service
        .get_session_events(id, user.id, user.role)
        .await?;
    Ok(Json(timeline))
}

#[axum::debug_handler]
pub async fn get_lockdown_config(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let config = state.proctor_service.get_lockdown_config(id, user.id).await?;
    Ok(Json(config))
}

#[axum::debug_handler]
pub async fn terminate_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let session = state.proctor_service.terminate_session(id, user.role).await?;
    Ok(Json(session))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::attempt_dto::{
        AttemptStatusResponse, StartAttemptResponse, SubmitAnswerRequest, SubmitAnswerResponse,
    },
    error::Result,
    middleware::auth::AuthUser,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/assessments/{id}/attempts",
    params(
        ("id" = Uuid, Path, description = "Assessment ID")
    ),
    responses(
        (status = 201, description = "Attempt started", body = Json<StartAttemptResponse>),
        (status = 404, description = "Assessment not found"),
        (status = 409, description = "Assessment not open or attempt limit reached")
    )
)]
#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let started = state.attempt_service.start_attempt(id, user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(StartAttemptResponse::from(started)),
    ))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/answers",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer saved", body = Json<SubmitAnswerResponse>),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt already finalized"),
        (status = 410, description = "Attempt time budget elapsed")
    )
)]
#[axum::debug_handler]
pub async fn submit_answer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let question_id = req.question_id;
    state
        .attempt_service
        .submit_answer(id, user.id, question_id, req.answer)
        .await?;
    Ok(Json(SubmitAnswerResponse {
        saved: true,
        question_id,
        timestamp: Utc::now(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/finish",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Attempt finished and scored", body = Json<serde_json::Value>),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt already finalized"),
        (status = 410, description = "Attempt time budget elapsed")
    )
)]
#[axum::debug_handler]
pub async fn finish_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.finish_attempt(id, user.id).await?;
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/attempts/{id}/result",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Result of a finalized attempt", body = Json<serde_json::Value>),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt is still in progress")
    )
)]
#[axum::debug_handler]
pub async fn get_result(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state
        .attempt_service
        .get_result(id, user.id, user.role)
        .await?;
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/attempts/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Live attempt status", body = Json<AttemptStatusResponse>),
        (status = 404, description = "Attempt not found")
    )
)]
#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let progress = state
        .attempt_service
        .get_progress(id, user.id, user.role)
        .await?;
    Ok(Json(AttemptStatusResponse::from(progress)))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/abandon",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Attempt abandoned", body = Json<serde_json::Value>),
        (status = 403, description = "Instructor or admin role required"),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt already finalized")
    )
)]
#[axum::debug_handler]
pub async fn abandon_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let attempt = state.attempt_service.abandon_attempt(id, user.role).await?;
    Ok(Json(json!({
        "attempt_id": attempt.id,
        "status": attempt.status,
        "ended_at": attempt.ended_at,
    })))
}

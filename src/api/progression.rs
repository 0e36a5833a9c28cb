use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::progression::{
    EnrollmentRequest, LevelAttemptResponse, RenewalRequest, RenewalResponse, RetryRequest,
};
use crate::services::progression;

pub(crate) fn enrollments_router() -> Router<AppState> {
    Router::new().route("/", post(enroll_student))
}

pub(crate) fn renewals_router() -> Router<AppState> {
    Router::new().route("/", post(renew_level))
}

pub(crate) fn retries_router() -> Router<AppState> {
    Router::new().route("/", post(retry_level))
}

async fn enroll_student(
    State(state): State<AppState>,
    Json(payload): Json<EnrollmentRequest>,
) -> Result<(StatusCode, Json<LevelAttemptResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let attempt =
        progression::enroll_student(&state, payload.student_id, payload.class_id).await?;
    Ok((StatusCode::CREATED, Json(LevelAttemptResponse::from_db(attempt))))
}

async fn renew_level(
    State(state): State<AppState>,
    Json(payload): Json<RenewalRequest>,
) -> Result<(StatusCode, Json<RenewalResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (renewed, opened) = progression::renew_level(
        &state,
        payload.student_id,
        payload.next_level_id,
        payload.class_id,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(RenewalResponse {
            renewed: LevelAttemptResponse::from_db(renewed),
            opened: LevelAttemptResponse::from_db(opened),
        }),
    ))
}

async fn retry_level(
    State(state): State<AppState>,
    Json(payload): Json<RetryRequest>,
) -> Result<(StatusCode, Json<LevelAttemptResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let attempt =
        progression::retry_level(&state, payload.student_id, payload.level_id, payload.class_id)
            .await?;
    Ok((StatusCode::CREATED, Json(LevelAttemptResponse::from_db(attempt))))
}

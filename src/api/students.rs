use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::progression::{AttemptHistoryResponse, LevelAttemptResponse};
use crate::services::progress_query::{self, StudentProgress};
use crate::services::progression;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:student_id/progress", get(get_student_progress))
        .route("/:student_id/levels/:level_id/attempts", get(list_level_attempts))
        .route("/:student_id/levels/:level_id/withdraw", post(withdraw_student))
}

async fn get_student_progress(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<StudentProgress>, ApiError> {
    Ok(Json(progress_query::get_student_progress(&state, student_id).await?))
}

async fn list_level_attempts(
    State(state): State<AppState>,
    Path((student_id, level_id)): Path<(i64, i64)>,
) -> Result<Json<Vec<AttemptHistoryResponse>>, ApiError> {
    let history = progression::list_level_attempts(&state, student_id, level_id).await?;
    Ok(Json(history.into_iter().map(AttemptHistoryResponse::from_history).collect()))
}

async fn withdraw_student(
    State(state): State<AppState>,
    Path((student_id, level_id)): Path<(i64, i64)>,
) -> Result<Json<LevelAttemptResponse>, ApiError> {
    let attempt = progression::withdraw_student(&state, student_id, level_id).await?;
    Ok(Json(LevelAttemptResponse::from_db(attempt)))
}

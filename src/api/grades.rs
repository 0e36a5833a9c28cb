use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::grades::{
    PeriodRecordResponse, SavePeriodGradesRequest, SavePeriodGradesResponse,
};
use crate::schemas::progression::{
    ClassFinalizeEntryResponse, ClassFinalizeResponse, FinalizeResponse,
};
use crate::services::grade_aggregator::ComponentScores;
use crate::services::period_records::{self, SavePeriodGrades};
use crate::services::progression;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/:class_id/students/:student_id/periods/:period_number",
            put(save_period_grades),
        )
        .route("/:class_id/students/:student_id/periods", get(list_period_records))
        .route("/:class_id/students/:student_id/finalize", post(finalize_level))
        .route("/:class_id/finalize", post(finalize_class))
}

async fn save_period_grades(
    State(state): State<AppState>,
    Path((class_id, student_id, period_number)): Path<(i64, i64, i32)>,
    Json(payload): Json<SavePeriodGradesRequest>,
) -> Result<Json<SavePeriodGradesResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let saved = period_records::save_period_grades(
        &state,
        SavePeriodGrades {
            class_id,
            student_id,
            period_number,
            scores: ComponentScores::new(
                payload.test1,
                payload.test2,
                payload.practical_exam,
                payload.theory_exam,
            ),
            strengths: payload.strengths,
            improvements: payload.improvements,
            reassessment: payload.reassessment,
        },
    )
    .await?;

    Ok(Json(SavePeriodGradesResponse::from_saved(saved)))
}

async fn list_period_records(
    State(state): State<AppState>,
    Path((class_id, student_id)): Path<(i64, i64)>,
) -> Result<Json<Vec<PeriodRecordResponse>>, ApiError> {
    let records = period_records::get_period_records(&state, class_id, student_id).await?;
    Ok(Json(records.into_iter().map(PeriodRecordResponse::from_db).collect()))
}

async fn finalize_level(
    State(state): State<AppState>,
    Path((class_id, student_id)): Path<(i64, i64)>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let report = progression::finalize_level(&state, class_id, student_id).await?;
    Ok(Json(FinalizeResponse::from_report(report)))
}

async fn finalize_class(
    State(state): State<AppState>,
    Path(class_id): Path<i64>,
) -> Result<Json<ClassFinalizeResponse>, ApiError> {
    let entries = progression::finalize_class(&state, class_id).await?;
    Ok(Json(ClassFinalizeResponse {
        class_id,
        students: entries.into_iter().map(ClassFinalizeEntryResponse::from_entry).collect(),
    }))
}

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::PeriodRecord;
use crate::schemas::progression::FinalizeResponse;
use crate::services::period_records::SavedPeriodGrades;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SavePeriodGradesRequest {
    #[validate(range(min = 0.0, max = 20.0, message = "test1 must be between 0 and 20"))]
    #[serde(alias = "teste1")]
    pub(crate) test1: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "test2 must be between 0 and 20"))]
    #[serde(alias = "teste2")]
    pub(crate) test2: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "practical_exam must be between 0 and 20"))]
    #[serde(alias = "practicalExam")]
    pub(crate) practical_exam: f64,
    #[validate(range(min = 0.0, max = 20.0, message = "theory_exam must be between 0 and 20"))]
    #[serde(alias = "theoryExam")]
    pub(crate) theory_exam: f64,
    #[validate(length(max = 2000, message = "strengths must be at most 2000 characters"))]
    #[serde(default)]
    pub(crate) strengths: Option<String>,
    #[validate(length(max = 2000, message = "improvements must be at most 2000 characters"))]
    #[serde(default)]
    pub(crate) improvements: Option<String>,
    #[serde(default, alias = "recoveryAssessment")]
    pub(crate) reassessment: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct PeriodRecordResponse {
    pub(crate) class_id: i64,
    pub(crate) student_id: i64,
    pub(crate) period_number: i32,
    pub(crate) test1: f64,
    pub(crate) test2: f64,
    pub(crate) practical_exam: f64,
    pub(crate) theory_exam: f64,
    pub(crate) final_score: i32,
    pub(crate) strengths: Option<String>,
    pub(crate) improvements: Option<String>,
    pub(crate) revision: i32,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl PeriodRecordResponse {
    pub(crate) fn from_db(record: PeriodRecord) -> Self {
        Self {
            class_id: record.class_id,
            student_id: record.student_id,
            period_number: record.period_number,
            test1: record.test1,
            test2: record.test2,
            practical_exam: record.practical_exam,
            theory_exam: record.theory_exam,
            final_score: record.final_score,
            strengths: record.strengths,
            improvements: record.improvements,
            revision: record.revision,
            created_at: format_primitive(record.created_at),
            updated_at: format_primitive(record.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SavePeriodGradesResponse {
    pub(crate) record: PeriodRecordResponse,
    pub(crate) changed: bool,
    pub(crate) finalize: Option<FinalizeResponse>,
}

impl SavePeriodGradesResponse {
    pub(crate) fn from_saved(saved: SavedPeriodGrades) -> Self {
        Self {
            record: PeriodRecordResponse::from_db(saved.record),
            changed: saved.changed,
            finalize: saved.finalize.map(FinalizeResponse::from_report),
        }
    }
}

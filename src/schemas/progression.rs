use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::{format_optional, format_primitive};
use crate::db::models::{LevelAttempt, LevelTransition};
use crate::db::types::{LevelEvent, LevelStatus};
use crate::services::progression::{
    AttemptHistory, ClassFinalizeEntry, FinalizeOutcome, FinalizeReport,
};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct EnrollmentRequest {
    #[validate(range(min = 1, message = "student_id must be positive"))]
    #[serde(alias = "studentId")]
    pub(crate) student_id: i64,
    #[validate(range(min = 1, message = "class_id must be positive"))]
    #[serde(alias = "classId")]
    pub(crate) class_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RenewalRequest {
    #[validate(range(min = 1, message = "student_id must be positive"))]
    #[serde(alias = "studentId")]
    pub(crate) student_id: i64,
    #[validate(range(min = 1, message = "next_level_id must be positive"))]
    #[serde(alias = "nextLevelId")]
    pub(crate) next_level_id: i64,
    #[validate(range(min = 1, message = "class_id must be positive"))]
    #[serde(alias = "classId")]
    pub(crate) class_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RetryRequest {
    #[validate(range(min = 1, message = "student_id must be positive"))]
    #[serde(alias = "studentId")]
    pub(crate) student_id: i64,
    #[validate(range(min = 1, message = "level_id must be positive"))]
    #[serde(alias = "levelId")]
    pub(crate) level_id: i64,
    #[validate(range(min = 1, message = "class_id must be positive"))]
    #[serde(alias = "classId")]
    pub(crate) class_id: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct LevelAttemptResponse {
    pub(crate) id: i64,
    pub(crate) student_id: i64,
    pub(crate) level_id: i64,
    pub(crate) level_number: i32,
    pub(crate) level_name: String,
    pub(crate) course_id: i64,
    pub(crate) next_level_id: Option<i64>,
    pub(crate) class_id: Option<i64>,
    pub(crate) class_name: Option<String>,
    pub(crate) attempt_number: i32,
    pub(crate) status: LevelStatus,
    pub(crate) status_label: &'static str,
    pub(crate) start_date: String,
    pub(crate) end_date: Option<String>,
    pub(crate) final_grade: Option<i32>,
    pub(crate) recovery_used: bool,
}

impl LevelAttemptResponse {
    pub(crate) fn from_db(attempt: LevelAttempt) -> Self {
        Self {
            id: attempt.id,
            student_id: attempt.student_id,
            level_id: attempt.level_id,
            level_number: attempt.level_number,
            level_name: attempt.level_name,
            course_id: attempt.course_id,
            next_level_id: attempt.next_level_id,
            class_id: attempt.class_id,
            class_name: attempt.class_name,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            status_label: attempt.status.label(),
            start_date: format_primitive(attempt.start_date),
            end_date: format_optional(attempt.end_date),
            final_grade: attempt.final_grade,
            recovery_used: attempt.recovery_used,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TransitionResponse {
    pub(crate) from_status: LevelStatus,
    pub(crate) to_status: LevelStatus,
    pub(crate) event: LevelEvent,
    pub(crate) score: Option<i32>,
    pub(crate) created_at: String,
}

impl TransitionResponse {
    pub(crate) fn from_db(transition: LevelTransition) -> Self {
        Self {
            from_status: transition.from_status,
            to_status: transition.to_status,
            event: transition.event,
            score: transition.score,
            created_at: format_primitive(transition.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptHistoryResponse {
    #[serde(flatten)]
    pub(crate) attempt: LevelAttemptResponse,
    pub(crate) transitions: Vec<TransitionResponse>,
}

impl AttemptHistoryResponse {
    pub(crate) fn from_history(history: AttemptHistory) -> Self {
        Self {
            attempt: LevelAttemptResponse::from_db(history.attempt),
            transitions: history.transitions.into_iter().map(TransitionResponse::from_db).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct FinalizeResponse {
    pub(crate) outcome: FinalizeOutcome,
    pub(crate) event: Option<LevelEvent>,
    pub(crate) attempt: LevelAttemptResponse,
}

impl FinalizeResponse {
    pub(crate) fn from_report(report: FinalizeReport) -> Self {
        Self {
            outcome: report.outcome,
            event: report.event,
            attempt: LevelAttemptResponse::from_db(report.attempt),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ClassFinalizeEntryResponse {
    pub(crate) student_id: i64,
    pub(crate) outcome: Option<FinalizeOutcome>,
    pub(crate) status: Option<LevelStatus>,
    pub(crate) error: Option<String>,
}

impl ClassFinalizeEntryResponse {
    pub(crate) fn from_entry(entry: ClassFinalizeEntry) -> Self {
        match entry.result {
            Ok(report) => Self {
                student_id: entry.student_id,
                outcome: Some(report.outcome),
                status: Some(report.attempt.status),
                error: None,
            },
            Err(error) => Self {
                student_id: entry.student_id,
                outcome: None,
                status: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ClassFinalizeResponse {
    pub(crate) class_id: i64,
    pub(crate) students: Vec<ClassFinalizeEntryResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RenewalResponse {
    pub(crate) renewed: LevelAttemptResponse,
    pub(crate) opened: LevelAttemptResponse,
}

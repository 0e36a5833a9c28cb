use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{LevelEvent, LevelStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Course {
    pub(crate) id: i64,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct CourseLevel {
    pub(crate) id: i64,
    pub(crate) course_id: i64,
    pub(crate) level_number: i32,
    pub(crate) name: String,
    pub(crate) period_count: i32,
    pub(crate) next_level_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct SchoolClass {
    pub(crate) id: i64,
    pub(crate) level_id: i64,
    pub(crate) name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct PeriodRecord {
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
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct LevelAttempt {
    pub(crate) id: i64,
    pub(crate) student_id: i64,
    pub(crate) level_id: i64,
    pub(crate) attempt_number: i32,
    pub(crate) status: LevelStatus,
    pub(crate) start_date: PrimitiveDateTime,
    pub(crate) end_date: Option<PrimitiveDateTime>,
    pub(crate) final_grade: Option<i32>,
    pub(crate) class_id: Option<i64>,
    pub(crate) class_name: Option<String>,
    pub(crate) level_number: i32,
    pub(crate) level_name: String,
    pub(crate) course_id: i64,
    pub(crate) next_level_id: Option<i64>,
    pub(crate) recovery_used: bool,
    pub(crate) evaluated_revision: Option<i32>,
    pub(crate) version: i32,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct LevelTransition {
    pub(crate) id: i64,
    pub(crate) attempt_id: i64,
    pub(crate) from_status: LevelStatus,
    pub(crate) to_status: LevelStatus,
    pub(crate) event: LevelEvent,
    pub(crate) score: Option<i32>,
    pub(crate) created_at: PrimitiveDateTime,
}

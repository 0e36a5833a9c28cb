use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{
    Course, CourseLevel, LevelAttempt, LevelTransition, PeriodRecord, SchoolClass,
};
use crate::db::types::{LevelEvent, LevelStatus};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("catalog error: {0}")]
    Catalog(String),
}

#[derive(Debug, Clone)]
pub(crate) struct PeriodRecordWrite {
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
    pub(crate) written_at: PrimitiveDateTime,
}

impl PeriodRecordWrite {
    /// True when `record` already holds exactly these inputs.
    pub(crate) fn matches(&self, record: &PeriodRecord) -> bool {
        record.test1 == self.test1
            && record.test2 == self.test2
            && record.practical_exam == self.practical_exam
            && record.theory_exam == self.theory_exam
            && record.final_score == self.final_score
            && record.strengths == self.strengths
            && record.improvements == self.improvements
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SavedPeriodRecord {
    pub(crate) record: PeriodRecord,
    pub(crate) changed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) student_id: i64,
    pub(crate) level: CourseLevel,
    pub(crate) class: SchoolClass,
    pub(crate) attempt_number: i32,
    /// Revision of a terminal record left in the class by an earlier attempt.
    pub(crate) baseline_revision: Option<i32>,
    pub(crate) started_at: PrimitiveDateTime,
}

/// Conditional update of one attempt plus its audit entry.
#[derive(Debug, Clone)]
pub(crate) struct AttemptTransition {
    pub(crate) attempt_id: i64,
    pub(crate) expected_version: i32,
    pub(crate) from_status: LevelStatus,
    pub(crate) to_status: LevelStatus,
    pub(crate) event: LevelEvent,
    pub(crate) score: Option<i32>,
    pub(crate) final_grade: Option<i32>,
    pub(crate) end_date: Option<PrimitiveDateTime>,
    pub(crate) recovery_used: bool,
    pub(crate) evaluated_revision: Option<i32>,
    pub(crate) at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FinalizeCandidate {
    pub(crate) class_id: i64,
    pub(crate) student_id: i64,
}

/// Persistence seam for grades, the level ledger, and the read-only course catalog.
///
/// Every method commits atomically; readers never observe half of a transition.
#[async_trait]
pub(crate) trait ProgressionStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_course(&self, course_id: i64) -> Result<Option<Course>, StoreError>;
    async fn count_course_levels(&self, course_id: i64) -> Result<i64, StoreError>;
    async fn find_level(&self, level_id: i64) -> Result<Option<CourseLevel>, StoreError>;
    async fn find_class(&self, class_id: i64) -> Result<Option<SchoolClass>, StoreError>;

    /// Inserts or overwrites one period record; identical inputs leave the row untouched.
    async fn upsert_period_record(
        &self,
        write: PeriodRecordWrite,
    ) -> Result<SavedPeriodRecord, StoreError>;
    async fn list_period_records(
        &self,
        class_id: i64,
        student_id: i64,
    ) -> Result<Vec<PeriodRecord>, StoreError>;

    async fn find_latest_attempt_in_class(
        &self,
        student_id: i64,
        class_id: i64,
    ) -> Result<Option<LevelAttempt>, StoreError>;
    async fn find_latest_attempt(
        &self,
        student_id: i64,
        level_id: i64,
    ) -> Result<Option<LevelAttempt>, StoreError>;
    async fn list_level_attempts(
        &self,
        student_id: i64,
        level_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError>;
    /// All attempts of a student ordered by level number then attempt number.
    async fn list_student_attempts(&self, student_id: i64)
        -> Result<Vec<LevelAttempt>, StoreError>;
    async fn list_open_attempts_in_class(
        &self,
        class_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError>;
    async fn list_transitions(&self, attempt_id: i64)
        -> Result<Vec<LevelTransition>, StoreError>;

    /// Opens an `in_progress` attempt; `Conflict` when the student already has a current one.
    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<LevelAttempt, StoreError>;
    /// Applies `transition` only if the attempt still has the expected version and status.
    async fn transition_attempt(
        &self,
        transition: AttemptTransition,
    ) -> Result<LevelAttempt, StoreError>;
    /// Clears the evaluation watermark of an open attempt so its terminal record is assessed again.
    async fn reopen_evaluation(
        &self,
        attempt_id: i64,
        expected_version: i32,
        at: PrimitiveDateTime,
    ) -> Result<LevelAttempt, StoreError>;
    /// Closes the awaiting-renewal attempt and opens the next level's attempt together.
    async fn renew_attempt(
        &self,
        transition: AttemptTransition,
        next: NewAttempt,
    ) -> Result<(LevelAttempt, LevelAttempt), StoreError>;

    /// Open attempts whose terminal period record changed since their last evaluation.
    ///
    /// With `require_every_period`, attempts missing any period record of their level are
    /// skipped until the record set is complete.
    async fn list_finalize_candidates(
        &self,
        limit: i64,
        require_every_period: bool,
    ) -> Result<Vec<FinalizeCandidate>, StoreError>;
}

use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{
    Course, CourseLevel, LevelAttempt, LevelTransition, PeriodRecord, SchoolClass,
};
use crate::repositories::store::{
    AttemptTransition, FinalizeCandidate, NewAttempt, PeriodRecordWrite, ProgressionStore,
    SavedPeriodRecord, StoreError,
};
use crate::repositories::{catalog, level_attempts, period_records};

#[derive(Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn open_attempt_conflict(error: sqlx::Error, student_id: i64) -> StoreError {
    if is_unique_violation(&error) {
        StoreError::Conflict(format!("Student {student_id} already has a current attempt"))
    } else {
        StoreError::Database(error)
    }
}

fn stale_attempt(attempt_id: i64) -> StoreError {
    StoreError::Conflict(format!("Level attempt {attempt_id} was modified concurrently"))
}

#[async_trait]
impl ProgressionStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_course(&self, course_id: i64) -> Result<Option<Course>, StoreError> {
        Ok(catalog::find_course(&self.pool, course_id).await?)
    }

    async fn count_course_levels(&self, course_id: i64) -> Result<i64, StoreError> {
        Ok(catalog::count_levels(&self.pool, course_id).await?)
    }

    async fn find_level(&self, level_id: i64) -> Result<Option<CourseLevel>, StoreError> {
        Ok(catalog::find_level(&self.pool, level_id).await?)
    }

    async fn find_class(&self, class_id: i64) -> Result<Option<SchoolClass>, StoreError> {
        Ok(catalog::find_class(&self.pool, class_id).await?)
    }

    async fn upsert_period_record(
        &self,
        write: PeriodRecordWrite,
    ) -> Result<SavedPeriodRecord, StoreError> {
        Ok(period_records::upsert(&self.pool, &write).await?)
    }

    async fn list_period_records(
        &self,
        class_id: i64,
        student_id: i64,
    ) -> Result<Vec<PeriodRecord>, StoreError> {
        Ok(period_records::list_for_student(&self.pool, class_id, student_id).await?)
    }

    async fn find_latest_attempt_in_class(
        &self,
        student_id: i64,
        class_id: i64,
    ) -> Result<Option<LevelAttempt>, StoreError> {
        Ok(level_attempts::find_latest_in_class(&self.pool, student_id, class_id).await?)
    }

    async fn find_latest_attempt(
        &self,
        student_id: i64,
        level_id: i64,
    ) -> Result<Option<LevelAttempt>, StoreError> {
        Ok(level_attempts::find_latest(&self.pool, student_id, level_id).await?)
    }

    async fn list_level_attempts(
        &self,
        student_id: i64,
        level_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError> {
        Ok(level_attempts::list_for_level(&self.pool, student_id, level_id).await?)
    }

    async fn list_student_attempts(
        &self,
        student_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError> {
        Ok(level_attempts::list_for_student(&self.pool, student_id).await?)
    }

    async fn list_open_attempts_in_class(
        &self,
        class_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError> {
        Ok(level_attempts::list_open_in_class(&self.pool, class_id).await?)
    }

    async fn list_transitions(
        &self,
        attempt_id: i64,
    ) -> Result<Vec<LevelTransition>, StoreError> {
        Ok(level_attempts::list_transitions(&self.pool, attempt_id).await?)
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<LevelAttempt, StoreError> {
        level_attempts::insert(&self.pool, &attempt)
            .await
            .map_err(|e| open_attempt_conflict(e, attempt.student_id))
    }

    async fn transition_attempt(
        &self,
        transition: AttemptTransition,
    ) -> Result<LevelAttempt, StoreError> {
        level_attempts::transition(&self.pool, &transition)
            .await?
            .ok_or_else(|| stale_attempt(transition.attempt_id))
    }

    async fn reopen_evaluation(
        &self,
        attempt_id: i64,
        expected_version: i32,
        at: PrimitiveDateTime,
    ) -> Result<LevelAttempt, StoreError> {
        level_attempts::reopen_evaluation(&self.pool, attempt_id, expected_version, at)
            .await?
            .ok_or_else(|| stale_attempt(attempt_id))
    }

    async fn renew_attempt(
        &self,
        transition: AttemptTransition,
        next: NewAttempt,
    ) -> Result<(LevelAttempt, LevelAttempt), StoreError> {
        level_attempts::renew(&self.pool, &transition, &next)
            .await
            .map_err(|e| open_attempt_conflict(e, next.student_id))?
            .ok_or_else(|| stale_attempt(transition.attempt_id))
    }

    async fn list_finalize_candidates(
        &self,
        limit: i64,
        require_every_period: bool,
    ) -> Result<Vec<FinalizeCandidate>, StoreError> {
        Ok(level_attempts::list_finalize_candidates(&self.pool, limit, require_every_period)
            .await?)
    }
}

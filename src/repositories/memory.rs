use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use time::PrimitiveDateTime;

use crate::db::models::{
    Course, CourseLevel, LevelAttempt, LevelTransition, PeriodRecord, SchoolClass,
};
use crate::db::types::LevelStatus;
use crate::repositories::store::{
    AttemptTransition, FinalizeCandidate, NewAttempt, PeriodRecordWrite, ProgressionStore,
    SavedPeriodRecord, StoreError,
};

/// Reference data for the in-memory backend, usually loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CatalogSeed {
    #[serde(default)]
    pub(crate) courses: Vec<Course>,
    #[serde(default)]
    pub(crate) levels: Vec<CourseLevel>,
    #[serde(default)]
    pub(crate) classes: Vec<SchoolClass>,
}

impl CatalogSeed {
    pub(crate) fn from_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Catalog(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Catalog(format!("failed to parse {}: {e}", path.display())))
    }

    fn validate(&self) -> Result<(), StoreError> {
        for level in &self.levels {
            if !self.courses.iter().any(|course| course.id == level.course_id) {
                return Err(StoreError::Catalog(format!(
                    "level {} references unknown course {}",
                    level.id, level.course_id
                )));
            }
            if level.period_count <= 0 {
                return Err(StoreError::Catalog(format!(
                    "level {} must have at least one period",
                    level.id
                )));
            }
        }
        for class in &self.classes {
            if !self.levels.iter().any(|level| level.id == class.level_id) {
                return Err(StoreError::Catalog(format!(
                    "class {} references unknown level {}",
                    class.id, class.level_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    courses: BTreeMap<i64, Course>,
    levels: BTreeMap<i64, CourseLevel>,
    classes: BTreeMap<i64, SchoolClass>,
    records: BTreeMap<(i64, i64, i32), PeriodRecord>,
    attempts: BTreeMap<i64, LevelAttempt>,
    transitions: Vec<LevelTransition>,
    next_attempt_id: i64,
    next_transition_id: i64,
}

impl MemoryState {
    fn has_current_attempt(&self, student_id: i64, level_id: i64) -> bool {
        self.attempts.values().any(|attempt| {
            attempt.student_id == student_id
                && attempt.level_id == level_id
                && attempt.status.is_current()
        })
    }

    fn insert_attempt(&mut self, attempt: NewAttempt) -> Result<LevelAttempt, StoreError> {
        if self.has_current_attempt(attempt.student_id, attempt.level.id) {
            return Err(StoreError::Conflict(format!(
                "Student {} already has a current attempt",
                attempt.student_id
            )));
        }

        self.next_attempt_id += 1;
        let row = LevelAttempt {
            id: self.next_attempt_id,
            student_id: attempt.student_id,
            level_id: attempt.level.id,
            attempt_number: attempt.attempt_number,
            status: LevelStatus::InProgress,
            start_date: attempt.started_at,
            end_date: None,
            final_grade: None,
            class_id: Some(attempt.class.id),
            class_name: Some(attempt.class.name),
            level_number: attempt.level.level_number,
            level_name: attempt.level.name,
            course_id: attempt.level.course_id,
            next_level_id: attempt.level.next_level_id,
            recovery_used: false,
            evaluated_revision: attempt.baseline_revision,
            version: 1,
            updated_at: attempt.started_at,
        };
        self.attempts.insert(row.id, row.clone());
        Ok(row)
    }

    /// Mirrors the conditional `UPDATE ... WHERE version = $ AND status = $` of the SQL store.
    fn check_transition(&self, transition: &AttemptTransition) -> Result<(), StoreError> {
        match self.attempts.get(&transition.attempt_id) {
            Some(attempt)
                if attempt.version == transition.expected_version
                    && attempt.status == transition.from_status =>
            {
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!(
                "Level attempt {} was modified concurrently",
                transition.attempt_id
            ))),
        }
    }

    fn apply_transition(&mut self, transition: &AttemptTransition) -> Option<LevelAttempt> {
        let attempt = self.attempts.get_mut(&transition.attempt_id)?;
        attempt.status = transition.to_status;
        if attempt.end_date.is_none() {
            attempt.end_date = transition.end_date;
        }
        if transition.final_grade.is_some() {
            attempt.final_grade = transition.final_grade;
        }
        attempt.recovery_used = transition.recovery_used;
        if transition.evaluated_revision.is_some() {
            attempt.evaluated_revision = transition.evaluated_revision;
        }
        attempt.version += 1;
        attempt.updated_at = transition.at;
        let updated = attempt.clone();

        self.next_transition_id += 1;
        self.transitions.push(LevelTransition {
            id: self.next_transition_id,
            attempt_id: transition.attempt_id,
            from_status: transition.from_status,
            to_status: transition.to_status,
            event: transition.event,
            score: transition.score,
            created_at: transition.at,
        });
        Some(updated)
    }
}

/// Process-local store; a single mutex makes every operation atomic.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub(crate) fn with_catalog(seed: CatalogSeed) -> Result<Self, StoreError> {
        seed.validate()?;

        let state = MemoryState {
            courses: seed.courses.into_iter().map(|course| (course.id, course)).collect(),
            levels: seed.levels.into_iter().map(|level| (level.id, level)).collect(),
            classes: seed.classes.into_iter().map(|class| (class.id, class)).collect(),
            ..MemoryState::default()
        };

        Ok(Self { state: Mutex::new(state) })
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProgressionStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_course(&self, course_id: i64) -> Result<Option<Course>, StoreError> {
        Ok(self.state().courses.get(&course_id).cloned())
    }

    async fn count_course_levels(&self, course_id: i64) -> Result<i64, StoreError> {
        let count =
            self.state().levels.values().filter(|level| level.course_id == course_id).count();
        Ok(count as i64)
    }

    async fn find_level(&self, level_id: i64) -> Result<Option<CourseLevel>, StoreError> {
        Ok(self.state().levels.get(&level_id).cloned())
    }

    async fn find_class(&self, class_id: i64) -> Result<Option<SchoolClass>, StoreError> {
        Ok(self.state().classes.get(&class_id).cloned())
    }

    async fn upsert_period_record(
        &self,
        write: PeriodRecordWrite,
    ) -> Result<SavedPeriodRecord, StoreError> {
        let mut state = self.state();
        let key = (write.class_id, write.student_id, write.period_number);

        if let Some(existing) = state.records.get(&key) {
            if write.matches(existing) {
                return Ok(SavedPeriodRecord { record: existing.clone(), changed: false });
            }
        }

        let (revision, created_at) = match state.records.get(&key) {
            Some(existing) => (existing.revision + 1, existing.created_at),
            None => (1, write.written_at),
        };
        let record = PeriodRecord {
            class_id: write.class_id,
            student_id: write.student_id,
            period_number: write.period_number,
            test1: write.test1,
            test2: write.test2,
            practical_exam: write.practical_exam,
            theory_exam: write.theory_exam,
            final_score: write.final_score,
            strengths: write.strengths,
            improvements: write.improvements,
            revision,
            created_at,
            updated_at: write.written_at,
        };
        state.records.insert(key, record.clone());

        Ok(SavedPeriodRecord { record, changed: true })
    }

    async fn list_period_records(
        &self,
        class_id: i64,
        student_id: i64,
    ) -> Result<Vec<PeriodRecord>, StoreError> {
        Ok(self
            .state()
            .records
            .range((class_id, student_id, i32::MIN)..=(class_id, student_id, i32::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn find_latest_attempt_in_class(
        &self,
        student_id: i64,
        class_id: i64,
    ) -> Result<Option<LevelAttempt>, StoreError> {
        Ok(self
            .state()
            .attempts
            .values()
            .filter(|attempt| {
                attempt.student_id == student_id && attempt.class_id == Some(class_id)
            })
            .max_by_key(|attempt| (attempt.attempt_number, attempt.id))
            .cloned())
    }

    async fn find_latest_attempt(
        &self,
        student_id: i64,
        level_id: i64,
    ) -> Result<Option<LevelAttempt>, StoreError> {
        Ok(self
            .state()
            .attempts
            .values()
            .filter(|attempt| attempt.student_id == student_id && attempt.level_id == level_id)
            .max_by_key(|attempt| (attempt.attempt_number, attempt.id))
            .cloned())
    }

    async fn list_level_attempts(
        &self,
        student_id: i64,
        level_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError> {
        let mut attempts: Vec<LevelAttempt> = self
            .state()
            .attempts
            .values()
            .filter(|attempt| attempt.student_id == student_id && attempt.level_id == level_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|attempt| (attempt.attempt_number, attempt.id));
        Ok(attempts)
    }

    async fn list_student_attempts(
        &self,
        student_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError> {
        let mut attempts: Vec<LevelAttempt> = self
            .state()
            .attempts
            .values()
            .filter(|attempt| attempt.student_id == student_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|attempt| (attempt.level_number, attempt.attempt_number, attempt.id));
        Ok(attempts)
    }

    async fn list_open_attempts_in_class(
        &self,
        class_id: i64,
    ) -> Result<Vec<LevelAttempt>, StoreError> {
        let mut attempts: Vec<LevelAttempt> = self
            .state()
            .attempts
            .values()
            .filter(|attempt| attempt.class_id == Some(class_id) && attempt.status.is_open())
            .cloned()
            .collect();
        attempts.sort_by_key(|attempt| attempt.student_id);
        Ok(attempts)
    }

    async fn list_transitions(
        &self,
        attempt_id: i64,
    ) -> Result<Vec<LevelTransition>, StoreError> {
        Ok(self
            .state()
            .transitions
            .iter()
            .filter(|transition| transition.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<LevelAttempt, StoreError> {
        self.state().insert_attempt(attempt)
    }

    async fn transition_attempt(
        &self,
        transition: AttemptTransition,
    ) -> Result<LevelAttempt, StoreError> {
        let mut state = self.state();
        state.check_transition(&transition)?;
        state.apply_transition(&transition).ok_or_else(|| {
            StoreError::Conflict(format!("Level attempt {} disappeared", transition.attempt_id))
        })
    }

    async fn reopen_evaluation(
        &self,
        attempt_id: i64,
        expected_version: i32,
        at: PrimitiveDateTime,
    ) -> Result<LevelAttempt, StoreError> {
        let mut state = self.state();
        match state.attempts.get_mut(&attempt_id) {
            Some(attempt) if attempt.version == expected_version && attempt.status.is_open() => {
                attempt.evaluated_revision = None;
                attempt.version += 1;
                attempt.updated_at = at;
                Ok(attempt.clone())
            }
            _ => Err(StoreError::Conflict(format!(
                "Level attempt {attempt_id} was modified concurrently"
            ))),
        }
    }

    async fn renew_attempt(
        &self,
        transition: AttemptTransition,
        next: NewAttempt,
    ) -> Result<(LevelAttempt, LevelAttempt), StoreError> {
        let mut state = self.state();
        state.check_transition(&transition)?;
        if state.has_current_attempt(next.student_id, next.level.id) {
            return Err(StoreError::Conflict(format!(
                "Student {} already has a current attempt",
                next.student_id
            )));
        }

        let closed = state.apply_transition(&transition).ok_or_else(|| {
            StoreError::Conflict(format!("Level attempt {} disappeared", transition.attempt_id))
        })?;
        let opened = state.insert_attempt(next)?;
        Ok((closed, opened))
    }

    async fn list_finalize_candidates(
        &self,
        limit: i64,
        require_every_period: bool,
    ) -> Result<Vec<FinalizeCandidate>, StoreError> {
        let state = self.state();
        let limit = usize::try_from(limit).unwrap_or(0);

        Ok(state
            .attempts
            .values()
            .filter(|attempt| attempt.status.is_open())
            .filter_map(|attempt| {
                let class_id = attempt.class_id?;
                let level = state.levels.get(&attempt.level_id)?;
                let record =
                    state.records.get(&(class_id, attempt.student_id, level.period_count))?;
                let stale = attempt
                    .evaluated_revision
                    .map_or(true, |evaluated| record.revision > evaluated);
                let complete = !require_every_period
                    || (1..=level.period_count).all(|period| {
                        state.records.contains_key(&(class_id, attempt.student_id, period))
                    });
                (stale && complete)
                    .then_some(FinalizeCandidate { class_id, student_id: attempt.student_id })
            })
            .take(limit)
            .collect())
    }
}

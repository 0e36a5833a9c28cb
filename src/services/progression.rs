use serde::Serialize;

use crate::core::config::PassRule;
use crate::core::metrics;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{CourseLevel, LevelAttempt, LevelTransition, SchoolClass};
use crate::db::types::{LevelEvent, LevelStatus};
use crate::repositories::store::{AttemptTransition, NewAttempt};
use crate::services::errors::{require_id, ProgressionError};
use crate::services::grade_aggregator::level_grade;
use crate::services::level_machine::{assess, closes_attempt, next_status};
use crate::services::progress_query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FinalizeOutcome {
    /// The attempt moved to a new status.
    Transitioned,
    /// Scores needed for the level grade are still missing.
    Pending,
    /// Nothing new to evaluate.
    Unchanged,
}

#[derive(Debug, Clone)]
pub(crate) struct FinalizeReport {
    pub(crate) outcome: FinalizeOutcome,
    pub(crate) event: Option<LevelEvent>,
    pub(crate) attempt: LevelAttempt,
}

impl FinalizeReport {
    fn untouched(outcome: FinalizeOutcome, attempt: LevelAttempt) -> Self {
        Self { outcome, event: None, attempt }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ClassFinalizeEntry {
    pub(crate) student_id: i64,
    pub(crate) result: Result<FinalizeReport, String>,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptHistory {
    pub(crate) attempt: LevelAttempt,
    pub(crate) transitions: Vec<LevelTransition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub(crate) processed: usize,
    pub(crate) transitioned: usize,
    pub(crate) failed: usize,
}

pub(crate) async fn load_class_level(
    state: &AppState,
    class_id: i64,
) -> Result<(SchoolClass, CourseLevel), ProgressionError> {
    let class = state
        .store()
        .find_class(class_id)
        .await?
        .ok_or_else(|| ProgressionError::NotFound(format!("Class {class_id} not found")))?;
    let level = load_level(state, class.level_id).await?;
    Ok((class, level))
}

async fn load_level(state: &AppState, level_id: i64) -> Result<CourseLevel, ProgressionError> {
    state
        .store()
        .find_level(level_id)
        .await?
        .ok_or_else(|| ProgressionError::NotFound(format!("Level {level_id} not found")))
}

/// Evaluates the student's attempt in `class_id` once its level grade is available.
///
/// Safe to call repeatedly: an attempt is only re-evaluated when its terminal period
/// record changed since the last evaluation or was resubmitted as a reassessment.
pub(crate) async fn finalize_level(
    state: &AppState,
    class_id: i64,
    student_id: i64,
) -> Result<FinalizeReport, ProgressionError> {
    require_id("class_id", class_id)?;
    require_id("student_id", student_id)?;

    let (class, level) = load_class_level(state, class_id).await?;
    let _guard = state.locks().lock(student_id, level.id).await;

    evaluate_locked(state, &class, &level, student_id).await
}

/// Caller must hold the `(student_id, level.id)` lock.
pub(crate) async fn evaluate_locked(
    state: &AppState,
    class: &SchoolClass,
    level: &CourseLevel,
    student_id: i64,
) -> Result<FinalizeReport, ProgressionError> {
    let Some(attempt) = state.store().find_latest_attempt_in_class(student_id, class.id).await?
    else {
        tracing::warn!(
            student_id,
            class_id = class.id,
            level_id = level.id,
            "Finalize requested for a student without a level attempt"
        );
        return Err(ProgressionError::InconsistentState(format!(
            "Student {student_id} has no level attempt in class {}",
            class.id
        )));
    };

    if !attempt.status.is_open() {
        return Ok(FinalizeReport::untouched(FinalizeOutcome::Unchanged, attempt));
    }

    let records = state.store().list_period_records(class.id, student_id).await?;
    let Some(terminal) = records.iter().find(|record| record.period_number == level.period_count)
    else {
        return Ok(FinalizeReport::untouched(FinalizeOutcome::Pending, attempt));
    };

    let already_evaluated =
        attempt.evaluated_revision.is_some_and(|evaluated| terminal.revision <= evaluated);
    if already_evaluated {
        return Ok(FinalizeReport::untouched(FinalizeOutcome::Unchanged, attempt));
    }

    let settings = state.settings().progression();
    let Some(grade) = level_grade(settings.pass_rule, level.period_count, &records) else {
        return Ok(FinalizeReport::untouched(FinalizeOutcome::Pending, attempt));
    };

    let recovery_available = settings.recovery_enabled && !attempt.recovery_used;
    let event = assess(attempt.status, grade, recovery_available, level.next_level_id.is_some());
    let to = next_status(attempt.status, event)?;
    let now = primitive_now_utc();

    let transition = AttemptTransition {
        attempt_id: attempt.id,
        expected_version: attempt.version,
        from_status: attempt.status,
        to_status: to,
        event,
        score: Some(grade),
        final_grade: closes_attempt(to).then_some(grade),
        end_date: closes_attempt(to).then_some(now),
        recovery_used: attempt.recovery_used || event == LevelEvent::Recover,
        evaluated_revision: Some(terminal.revision),
        at: now,
    };
    let updated = state.store().transition_attempt(transition).await?;
    after_transition(state, &updated, attempt.status, event).await;

    Ok(FinalizeReport {
        outcome: FinalizeOutcome::Transitioned,
        event: Some(event),
        attempt: updated,
    })
}

/// Finalizes every student with an open attempt in the class; failures are reported per student.
pub(crate) async fn finalize_class(
    state: &AppState,
    class_id: i64,
) -> Result<Vec<ClassFinalizeEntry>, ProgressionError> {
    require_id("class_id", class_id)?;

    let (class, level) = load_class_level(state, class_id).await?;
    let open_attempts = state.store().list_open_attempts_in_class(class.id).await?;

    let mut entries = Vec::with_capacity(open_attempts.len());
    for attempt in open_attempts {
        let student_id = attempt.student_id;
        let _guard = state.locks().lock(student_id, level.id).await;
        let result = evaluate_locked(state, &class, &level, student_id).await.map_err(|err| {
            tracing::warn!(student_id, class_id, error = %err, "Class finalize skipped student");
            err.to_string()
        });
        entries.push(ClassFinalizeEntry { student_id, result });
    }

    Ok(entries)
}

/// Opens attempt 1 of the class's level for a newly enrolled student.
pub(crate) async fn enroll_student(
    state: &AppState,
    student_id: i64,
    class_id: i64,
) -> Result<LevelAttempt, ProgressionError> {
    require_id("student_id", student_id)?;
    require_id("class_id", class_id)?;

    let (class, level) = load_class_level(state, class_id).await?;
    let _guard = state.locks().lock(student_id, level.id).await;

    if let Some(existing) = state.store().find_latest_attempt(student_id, level.id).await? {
        let hint = if existing.status.is_current() { "a current" } else { "a previous" };
        return Err(ProgressionError::Conflict(format!(
            "Student {student_id} already has {hint} attempt for level {}",
            level.id
        )));
    }

    open_attempt(state, student_id, level, class, 1).await
}

/// Opens the next attempt of a level whose latest attempt failed or was withdrawn.
pub(crate) async fn retry_level(
    state: &AppState,
    student_id: i64,
    level_id: i64,
    class_id: i64,
) -> Result<LevelAttempt, ProgressionError> {
    require_id("student_id", student_id)?;
    require_id("level_id", level_id)?;
    require_id("class_id", class_id)?;

    let (class, level) = load_class_level(state, class_id).await?;
    ensure_class_teaches(&class, level_id)?;
    let _guard = state.locks().lock(student_id, level.id).await;

    let latest = state.store().find_latest_attempt(student_id, level.id).await?.ok_or_else(|| {
        ProgressionError::NotFound(format!(
            "Student {student_id} has no attempt for level {level_id} to retry"
        ))
    })?;
    if !matches!(latest.status, LevelStatus::Failed | LevelStatus::Withdrawn) {
        return Err(ProgressionError::Conflict(format!(
            "Level {level_id} cannot be retried while its latest attempt is {}",
            latest.status.as_str()
        )));
    }

    open_attempt(state, student_id, level, class, latest.attempt_number + 1).await
}

/// Closes the awaiting-renewal attempt that leads to `next_level_id` and opens the next level.
pub(crate) async fn renew_level(
    state: &AppState,
    student_id: i64,
    next_level_id: i64,
    class_id: i64,
) -> Result<(LevelAttempt, LevelAttempt), ProgressionError> {
    require_id("student_id", student_id)?;
    require_id("next_level_id", next_level_id)?;
    require_id("class_id", class_id)?;

    let (class, next_level) = load_class_level(state, class_id).await?;
    ensure_class_teaches(&class, next_level_id)?;

    let previous = find_awaiting_renewal(state, student_id, next_level_id).await?;

    // Fixed lock order so concurrent renewals cannot deadlock.
    let (first, second) = if previous.level_id < next_level.id {
        (previous.level_id, next_level.id)
    } else {
        (next_level.id, previous.level_id)
    };
    let _first = state.locks().lock(student_id, first).await;
    let _second = state.locks().lock(student_id, second).await;

    let previous = find_awaiting_renewal(state, student_id, next_level_id).await?;
    let to = next_status(previous.status, LevelEvent::Renew)?;
    let next_attempt_number = state
        .store()
        .find_latest_attempt(student_id, next_level.id)
        .await?
        .map_or(1, |attempt| attempt.attempt_number + 1);
    let baseline_revision = terminal_revision(state, &class, &next_level, student_id).await?;
    let now = primitive_now_utc();

    let transition = AttemptTransition {
        attempt_id: previous.id,
        expected_version: previous.version,
        from_status: previous.status,
        to_status: to,
        event: LevelEvent::Renew,
        score: previous.final_grade,
        final_grade: None,
        end_date: Some(now),
        recovery_used: previous.recovery_used,
        evaluated_revision: None,
        at: now,
    };
    let next = NewAttempt {
        student_id,
        level: next_level,
        class,
        attempt_number: next_attempt_number,
        baseline_revision,
        started_at: now,
    };

    let (closed, opened) = state.store().renew_attempt(transition, next).await?;
    after_transition(state, &closed, previous.status, LevelEvent::Renew).await;
    tracing::info!(
        student_id,
        level_id = opened.level_id,
        class_id = opened.class_id,
        attempt_number = opened.attempt_number,
        "Level attempt opened by renewal"
    );

    Ok((closed, opened))
}

/// Administrative withdrawal; closes whichever current attempt the student holds for the level.
///
/// An attempt awaiting renewal closes as passed, so the level stays credited.
pub(crate) async fn withdraw_student(
    state: &AppState,
    student_id: i64,
    level_id: i64,
) -> Result<LevelAttempt, ProgressionError> {
    require_id("student_id", student_id)?;
    require_id("level_id", level_id)?;

    let level = load_level(state, level_id).await?;
    let _guard = state.locks().lock(student_id, level.id).await;

    let attempt = state.store().find_latest_attempt(student_id, level.id).await?.ok_or_else(|| {
        ProgressionError::NotFound(format!(
            "Student {student_id} has no attempt for level {level_id}"
        ))
    })?;
    let to = next_status(attempt.status, LevelEvent::Withdraw)?;
    let now = primitive_now_utc();

    let transition = AttemptTransition {
        attempt_id: attempt.id,
        expected_version: attempt.version,
        from_status: attempt.status,
        to_status: to,
        event: LevelEvent::Withdraw,
        score: None,
        final_grade: None,
        end_date: Some(now),
        recovery_used: attempt.recovery_used,
        evaluated_revision: None,
        at: now,
    };
    let updated = state.store().transition_attempt(transition).await?;
    after_transition(state, &updated, attempt.status, LevelEvent::Withdraw).await;

    Ok(updated)
}

pub(crate) async fn list_level_attempts(
    state: &AppState,
    student_id: i64,
    level_id: i64,
) -> Result<Vec<AttemptHistory>, ProgressionError> {
    require_id("student_id", student_id)?;
    require_id("level_id", level_id)?;

    load_level(state, level_id).await?;
    let attempts = state.store().list_level_attempts(student_id, level_id).await?;

    let mut history = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        let transitions = state.store().list_transitions(attempt.id).await?;
        history.push(AttemptHistory { attempt, transitions });
    }
    Ok(history)
}

/// Finalizes attempts whose terminal period record changed since their last evaluation.
pub(crate) async fn run_finalize_sweep(
    state: &AppState,
    limit: i64,
) -> Result<SweepReport, ProgressionError> {
    let require_every_period = state.settings().progression().pass_rule == PassRule::PeriodAverage;
    let candidates =
        state.store().list_finalize_candidates(limit, require_every_period).await?;
    let mut report = SweepReport::default();

    for candidate in candidates {
        report.processed += 1;
        match finalize_level(state, candidate.class_id, candidate.student_id).await {
            Ok(result) if result.outcome == FinalizeOutcome::Transitioned => {
                report.transitioned += 1;
            }
            Ok(_) => {}
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    student_id = candidate.student_id,
                    class_id = candidate.class_id,
                    error = %err,
                    "Finalize sweep failed for student"
                );
            }
        }
    }

    metrics::record_sweep(report.processed, report.transitioned);
    Ok(report)
}

async fn open_attempt(
    state: &AppState,
    student_id: i64,
    level: CourseLevel,
    class: SchoolClass,
    attempt_number: i32,
) -> Result<LevelAttempt, ProgressionError> {
    let baseline_revision = terminal_revision(state, &class, &level, student_id).await?;
    let attempt = state
        .store()
        .insert_attempt(NewAttempt {
            student_id,
            level,
            class,
            attempt_number,
            baseline_revision,
            started_at: primitive_now_utc(),
        })
        .await?;

    tracing::info!(
        student_id,
        level_id = attempt.level_id,
        class_id = attempt.class_id,
        attempt_number,
        "Level attempt opened"
    );
    progress_query::invalidate(state, student_id).await;

    Ok(attempt)
}

/// Revision of the terminal record already stored for the student in `class`, if any.
async fn terminal_revision(
    state: &AppState,
    class: &SchoolClass,
    level: &CourseLevel,
    student_id: i64,
) -> Result<Option<i32>, ProgressionError> {
    Ok(state
        .store()
        .list_period_records(class.id, student_id)
        .await?
        .into_iter()
        .find(|record| record.period_number == level.period_count)
        .map(|record| record.revision))
}

async fn find_awaiting_renewal(
    state: &AppState,
    student_id: i64,
    next_level_id: i64,
) -> Result<LevelAttempt, ProgressionError> {
    state
        .store()
        .list_student_attempts(student_id)
        .await?
        .into_iter()
        .find(|attempt| {
            attempt.status == LevelStatus::AwaitingRenewal
                && attempt.next_level_id == Some(next_level_id)
        })
        .ok_or_else(|| {
            tracing::warn!(student_id, next_level_id, "Renewal without an awaiting attempt");
            ProgressionError::InconsistentState(format!(
                "Student {student_id} has no attempt awaiting renewal into level {next_level_id}"
            ))
        })
}

fn ensure_class_teaches(class: &SchoolClass, level_id: i64) -> Result<(), ProgressionError> {
    if class.level_id == level_id {
        Ok(())
    } else {
        Err(ProgressionError::Validation(format!(
            "Class {} does not teach level {level_id}",
            class.id
        )))
    }
}

async fn after_transition(
    state: &AppState,
    attempt: &LevelAttempt,
    from: LevelStatus,
    event: LevelEvent,
) {
    tracing::info!(
        student_id = attempt.student_id,
        level_id = attempt.level_id,
        class_id = attempt.class_id,
        attempt_id = attempt.id,
        from = from.as_str(),
        to = attempt.status.as_str(),
        event = event.as_str(),
        final_grade = attempt.final_grade,
        "Level attempt transitioned"
    );
    metrics::record_transition(from, attempt.status);
    progress_query::invalidate(state, attempt.student_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::grade_aggregator::ComponentScores;
    use crate::services::period_records::{save_period_grades, SavePeriodGrades};
    use crate::test_support::{
        memory_state, memory_state_with, BASIC_CLASS_ID, BASIC_LEVEL_ID, FINAL_CLASS_ID,
        FINAL_LEVEL_ID, INTERMEDIATE_CLASS_ID, INTERMEDIATE_LEVEL_ID,
    };

    fn grades(class_id: i64, student_id: i64, period: i32, score: f64) -> SavePeriodGrades {
        SavePeriodGrades {
            class_id,
            student_id,
            period_number: period,
            scores: ComponentScores::new(score, score, score, score),
            strengths: None,
            improvements: None,
            reassessment: false,
        }
    }

    async fn save(state: &AppState, class_id: i64, student_id: i64, period: i32, score: f64) {
        save_period_grades(state, grades(class_id, student_id, period, score))
            .await
            .expect("save period grades");
    }

    async fn reassess(state: &AppState, class_id: i64, student_id: i64, score: f64) {
        let input =
            SavePeriodGrades { reassessment: true, ..grades(class_id, student_id, 4, score) };
        save_period_grades(state, input).await.expect("save reassessment");
    }

    async fn status_of(state: &AppState, student_id: i64, level_id: i64) -> LevelStatus {
        state
            .store()
            .find_latest_attempt(student_id, level_id)
            .await
            .expect("latest")
            .expect("attempt")
            .status
    }

    #[tokio::test]
    async fn scenario_recovery_then_pass_on_last_level() {
        let state = memory_state().await;
        enroll_student(&state, 1, FINAL_CLASS_ID).await.expect("enroll");

        for (period, score) in [(1, 12.0), (2, 14.0), (3, 13.0)] {
            save(&state, FINAL_CLASS_ID, 1, period, score).await;
            assert_eq!(status_of(&state, 1, FINAL_LEVEL_ID).await, LevelStatus::InProgress);
        }

        save(&state, FINAL_CLASS_ID, 1, 4, 8.0).await;
        let report = finalize_level(&state, FINAL_CLASS_ID, 1).await.expect("finalize");
        assert_eq!(report.attempt.status, LevelStatus::Recovery);
        assert_eq!(report.attempt.final_grade, None);
        assert_eq!(report.attempt.end_date, None);

        save(&state, FINAL_CLASS_ID, 1, 4, 11.0).await;
        let report = finalize_level(&state, FINAL_CLASS_ID, 1).await.expect("finalize");
        assert_eq!(report.attempt.status, LevelStatus::Passed);
        assert_eq!(report.attempt.final_grade, Some(11));
        assert!(report.attempt.end_date.is_some());
        assert_eq!(report.attempt.attempt_number, 1);
    }

    #[tokio::test]
    async fn recovery_below_pass_mark_fails() {
        let state = memory_state().await;
        enroll_student(&state, 2, BASIC_CLASS_ID).await.expect("enroll");

        save(&state, BASIC_CLASS_ID, 2, 4, 7.0).await;
        assert_eq!(status_of(&state, 2, BASIC_LEVEL_ID).await, LevelStatus::Recovery);

        save(&state, BASIC_CLASS_ID, 2, 4, 9.0).await;
        let attempt = state
            .store()
            .find_latest_attempt(2, BASIC_LEVEL_ID)
            .await
            .expect("latest")
            .expect("attempt");
        assert_eq!(attempt.status, LevelStatus::Failed);
        assert_eq!(attempt.final_grade, Some(9));
        assert!(attempt.end_date.is_some());
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let state = memory_state().await;
        enroll_student(&state, 3, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 3, 4, 15.0).await;

        let first = finalize_level(&state, BASIC_CLASS_ID, 3).await.expect("first");
        let second = finalize_level(&state, BASIC_CLASS_ID, 3).await.expect("second");
        assert_eq!(first.outcome, FinalizeOutcome::Unchanged);
        assert_eq!(second.outcome, FinalizeOutcome::Unchanged);
        assert_eq!(second.attempt.status, LevelStatus::AwaitingRenewal);

        let history = list_level_attempts(&state, 3, BASIC_LEVEL_ID).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transitions.len(), 1);
        assert_eq!(history[0].transitions[0].event, LevelEvent::Pass);
    }

    #[tokio::test]
    async fn finalize_without_terminal_record_is_pending() {
        let state = memory_state_with(|_| {}).await;
        enroll_student(&state, 4, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 4, 1, 15.0).await;

        let report = finalize_level(&state, BASIC_CLASS_ID, 4).await.expect("finalize");
        assert_eq!(report.outcome, FinalizeOutcome::Pending);
        assert_eq!(report.attempt.status, LevelStatus::InProgress);
    }

    #[tokio::test]
    async fn finalize_without_attempt_is_inconsistent() {
        let state = memory_state().await;

        let err = finalize_level(&state, BASIC_CLASS_ID, 99).await.expect_err("no attempt");
        assert!(matches!(err, ProgressionError::InconsistentState(_)));
    }

    #[tokio::test]
    async fn manual_finalize_when_auto_finalize_disabled() {
        let state = memory_state_with(|settings| settings.auto_finalize = false).await;
        enroll_student(&state, 5, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 5, 4, 10.0).await;
        assert_eq!(status_of(&state, 5, BASIC_LEVEL_ID).await, LevelStatus::InProgress);

        let report = finalize_level(&state, BASIC_CLASS_ID, 5).await.expect("finalize");
        assert_eq!(report.outcome, FinalizeOutcome::Transitioned);
        assert_eq!(report.event, Some(LevelEvent::Pass));
        assert_eq!(report.attempt.status, LevelStatus::AwaitingRenewal);
        assert_eq!(report.attempt.final_grade, Some(10));
    }

    #[tokio::test]
    async fn recovery_disabled_fails_directly() {
        let state = memory_state_with(|settings| settings.recovery_enabled = false).await;
        enroll_student(&state, 6, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 6, 4, 9.0).await;

        assert_eq!(status_of(&state, 6, BASIC_LEVEL_ID).await, LevelStatus::Failed);
    }

    #[tokio::test]
    async fn period_average_rule_waits_for_every_period() {
        let state = memory_state_with(|settings| {
            settings.pass_rule = PassRule::PeriodAverage;
            settings.auto_finalize = false;
        })
        .await;
        enroll_student(&state, 7, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 7, 4, 8.0).await;

        let pending = finalize_level(&state, BASIC_CLASS_ID, 7).await.expect("pending");
        assert_eq!(pending.outcome, FinalizeOutcome::Pending);

        for period in 1..=3 {
            save(&state, BASIC_CLASS_ID, 7, period, 12.0).await;
        }
        let report = finalize_level(&state, BASIC_CLASS_ID, 7).await.expect("finalize");
        // (12 + 12 + 12 + 8) / 4 = 11
        assert_eq!(report.attempt.final_grade, Some(11));
        assert_eq!(report.attempt.status, LevelStatus::AwaitingRenewal);
    }

    #[tokio::test]
    async fn renewal_opens_next_level_and_closes_bridge() {
        let state = memory_state().await;
        enroll_student(&state, 8, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 8, 4, 14.0).await;

        let (closed, opened) =
            renew_level(&state, 8, INTERMEDIATE_LEVEL_ID, INTERMEDIATE_CLASS_ID)
                .await
                .expect("renew");
        assert_eq!(closed.status, LevelStatus::Passed);
        assert_eq!(closed.final_grade, Some(14));
        assert_eq!(opened.level_id, INTERMEDIATE_LEVEL_ID);
        assert_eq!(opened.attempt_number, 1);
        assert_eq!(opened.status, LevelStatus::InProgress);

        let again = renew_level(&state, 8, INTERMEDIATE_LEVEL_ID, INTERMEDIATE_CLASS_ID)
            .await
            .expect_err("already renewed");
        assert!(matches!(again, ProgressionError::InconsistentState(_)));
    }

    #[tokio::test]
    async fn renewal_rejects_class_of_other_level() {
        let state = memory_state().await;

        let err = renew_level(&state, 8, INTERMEDIATE_LEVEL_ID, BASIC_CLASS_ID)
            .await
            .expect_err("wrong class");
        assert!(matches!(err, ProgressionError::Validation(_)));
    }

    #[tokio::test]
    async fn enroll_twice_conflicts() {
        let state = memory_state().await;
        enroll_student(&state, 9, BASIC_CLASS_ID).await.expect("enroll");

        let err = enroll_student(&state, 9, BASIC_CLASS_ID).await.expect_err("second");
        assert!(matches!(err, ProgressionError::Conflict(_)));
    }

    #[tokio::test]
    async fn retry_after_failure_opens_next_attempt() {
        let state = memory_state().await;
        enroll_student(&state, 10, BASIC_CLASS_ID).await.expect("enroll");

        let err = retry_level(&state, 10, BASIC_LEVEL_ID, BASIC_CLASS_ID)
            .await
            .expect_err("still open");
        assert!(matches!(err, ProgressionError::Conflict(_)));

        save(&state, BASIC_CLASS_ID, 10, 4, 5.0).await;
        save(&state, BASIC_CLASS_ID, 10, 4, 6.0).await;
        assert_eq!(status_of(&state, 10, BASIC_LEVEL_ID).await, LevelStatus::Failed);

        let retry = retry_level(&state, 10, BASIC_LEVEL_ID, BASIC_CLASS_ID).await.expect("retry");
        assert_eq!(retry.attempt_number, 2);
        assert!(!retry.recovery_used);
        assert_eq!(retry.status, LevelStatus::InProgress);
    }

    #[tokio::test]
    async fn withdraw_closes_current_attempt_once() {
        let state = memory_state().await;
        enroll_student(&state, 11, BASIC_CLASS_ID).await.expect("enroll");

        let withdrawn = withdraw_student(&state, 11, BASIC_LEVEL_ID).await.expect("withdraw");
        assert_eq!(withdrawn.status, LevelStatus::Withdrawn);
        assert!(withdrawn.end_date.is_some());

        let err = withdraw_student(&state, 11, BASIC_LEVEL_ID).await.expect_err("terminal");
        assert!(matches!(err, ProgressionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn class_finalize_reports_each_student() {
        let state = memory_state_with(|settings| settings.auto_finalize = false).await;
        for student_id in [21, 22] {
            enroll_student(&state, student_id, BASIC_CLASS_ID).await.expect("enroll");
        }
        save(&state, BASIC_CLASS_ID, 21, 4, 16.0).await;

        let entries = finalize_class(&state, BASIC_CLASS_ID).await.expect("finalize class");
        assert_eq!(entries.len(), 2);
        let outcome = |student_id: i64| {
            entries
                .iter()
                .find(|entry| entry.student_id == student_id)
                .and_then(|entry| entry.result.as_ref().ok())
                .map(|report| report.outcome)
        };
        assert_eq!(outcome(21), Some(FinalizeOutcome::Transitioned));
        assert_eq!(outcome(22), Some(FinalizeOutcome::Pending));
    }

    #[tokio::test]
    async fn sweep_finalizes_stale_attempts_once() {
        let state = memory_state_with(|settings| settings.auto_finalize = false).await;
        enroll_student(&state, 31, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 31, 4, 12.0).await;

        let first = run_finalize_sweep(&state, 100).await.expect("sweep");
        assert_eq!(first, SweepReport { processed: 1, transitioned: 1, failed: 0 });

        let second = run_finalize_sweep(&state, 100).await.expect("sweep");
        assert_eq!(second, SweepReport::default());
    }

    #[tokio::test]
    async fn recovery_reassessment_with_repeated_scores_fails() {
        let state = memory_state().await;
        enroll_student(&state, 41, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 41, 4, 8.0).await;
        assert_eq!(status_of(&state, 41, BASIC_LEVEL_ID).await, LevelStatus::Recovery);

        // A plain replay of the same save is not a new assessment.
        save(&state, BASIC_CLASS_ID, 41, 4, 8.0).await;
        assert_eq!(status_of(&state, 41, BASIC_LEVEL_ID).await, LevelStatus::Recovery);

        reassess(&state, BASIC_CLASS_ID, 41, 8.0).await;
        let attempt = state
            .store()
            .find_latest_attempt(41, BASIC_LEVEL_ID)
            .await
            .expect("latest")
            .expect("attempt");
        assert_eq!(attempt.status, LevelStatus::Failed);
        assert_eq!(attempt.final_grade, Some(8));

        let history = list_level_attempts(&state, 41, BASIC_LEVEL_ID).await.expect("history");
        let events: Vec<LevelEvent> =
            history[0].transitions.iter().map(|transition| transition.event).collect();
        assert_eq!(events, vec![LevelEvent::Recover, LevelEvent::Fail]);
    }

    #[tokio::test]
    async fn reassessment_without_auto_finalize_is_picked_up_later() {
        let state = memory_state_with(|settings| settings.auto_finalize = false).await;
        enroll_student(&state, 42, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 42, 4, 0.0).await;
        let report = finalize_level(&state, BASIC_CLASS_ID, 42).await.expect("first");
        assert_eq!(report.attempt.status, LevelStatus::Recovery);

        reassess(&state, BASIC_CLASS_ID, 42, 0.0).await;
        assert_eq!(status_of(&state, 42, BASIC_LEVEL_ID).await, LevelStatus::Recovery);

        let swept = run_finalize_sweep(&state, 10).await.expect("sweep");
        assert_eq!(swept, SweepReport { processed: 1, transitioned: 1, failed: 0 });
        assert_eq!(status_of(&state, 42, BASIC_LEVEL_ID).await, LevelStatus::Failed);
    }

    #[tokio::test]
    async fn retry_with_repeated_scores_needs_reassessment() {
        let state = memory_state().await;
        enroll_student(&state, 43, BASIC_CLASS_ID).await.expect("enroll");
        save(&state, BASIC_CLASS_ID, 43, 4, 5.0).await;
        save(&state, BASIC_CLASS_ID, 43, 4, 6.0).await;
        retry_level(&state, 43, BASIC_LEVEL_ID, BASIC_CLASS_ID).await.expect("retry");

        let report = finalize_level(&state, BASIC_CLASS_ID, 43).await.expect("finalize");
        assert_eq!(report.outcome, FinalizeOutcome::Unchanged);

        reassess(&state, BASIC_CLASS_ID, 43, 6.0).await;
        let latest = state
            .store()
            .find_latest_attempt(43, BASIC_LEVEL_ID)
            .await
            .expect("latest")
            .expect("attempt");
        assert_eq!(latest.attempt_number, 2);
        assert_eq!(latest.status, LevelStatus::Recovery);
    }

    #[tokio::test]
    async fn sweep_skips_incomplete_period_average_attempts() {
        let state = memory_state_with(|settings| {
            settings.pass_rule = PassRule::PeriodAverage;
            settings.auto_finalize = false;
        })
        .await;
        for student_id in [44, 45] {
            enroll_student(&state, student_id, BASIC_CLASS_ID).await.expect("enroll");
        }
        save(&state, BASIC_CLASS_ID, 44, 4, 12.0).await;
        for period in 1..=4 {
            save(&state, BASIC_CLASS_ID, 45, period, 12.0).await;
        }

        let first = run_finalize_sweep(&state, 1).await.expect("sweep");
        assert_eq!(first, SweepReport { processed: 1, transitioned: 1, failed: 0 });
        assert_eq!(status_of(&state, 45, BASIC_LEVEL_ID).await, LevelStatus::AwaitingRenewal);
        assert_eq!(status_of(&state, 44, BASIC_LEVEL_ID).await, LevelStatus::InProgress);

        let second = run_finalize_sweep(&state, 1).await.expect("sweep");
        assert_eq!(second, SweepReport::default());

        for period in 1..=3 {
            save(&state, BASIC_CLASS_ID, 44, period, 12.0).await;
        }
        let third = run_finalize_sweep(&state, 1).await.expect("sweep");
        assert_eq!(third.transitioned, 1);
        assert_eq!(status_of(&state, 44, BASIC_LEVEL_ID).await, LevelStatus::AwaitingRenewal);
    }
}

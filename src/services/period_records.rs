use crate::core::metrics;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::PeriodRecord;
use crate::repositories::store::PeriodRecordWrite;
use crate::services::errors::{require_id, ProgressionError};
use crate::services::grade_aggregator::{compute_final_score, ComponentScores};
use crate::services::progression::{evaluate_locked, load_class_level, FinalizeReport};

#[derive(Debug, Clone)]
pub(crate) struct SavePeriodGrades {
    pub(crate) class_id: i64,
    pub(crate) student_id: i64,
    pub(crate) period_number: i32,
    pub(crate) scores: ComponentScores,
    pub(crate) strengths: Option<String>,
    pub(crate) improvements: Option<String>,
    /// Marks a terminal-period save as a new assessment of the open attempt, so it is
    /// evaluated even when the scores repeat the ones already evaluated.
    pub(crate) reassessment: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SavedPeriodGrades {
    pub(crate) record: PeriodRecord,
    pub(crate) changed: bool,
    /// Present when a terminal-period save evaluated the level inline.
    pub(crate) finalize: Option<FinalizeReport>,
}

/// Stores one period's scores, overwriting any previous entry for the same period.
pub(crate) async fn save_period_grades(
    state: &AppState,
    input: SavePeriodGrades,
) -> Result<SavedPeriodGrades, ProgressionError> {
    require_id("class_id", input.class_id)?;
    require_id("student_id", input.student_id)?;
    if input.period_number < 1 {
        return Err(ProgressionError::Validation(format!(
            "period_number must be at least 1, got {}",
            input.period_number
        )));
    }
    let final_score = compute_final_score(&input.scores)?;

    let (class, level) = load_class_level(state, input.class_id).await?;
    if input.period_number > level.period_count {
        return Err(ProgressionError::Validation(format!(
            "period_number {} is outside 1..={} for level {}",
            input.period_number, level.period_count, level.id
        )));
    }
    let is_terminal = input.period_number == level.period_count;
    if input.reassessment && !is_terminal {
        return Err(ProgressionError::Validation(format!(
            "reassessment only applies to the terminal period {} of level {}",
            level.period_count, level.id
        )));
    }

    let _guard = state.locks().lock(input.student_id, level.id).await;

    let attempt = state
        .store()
        .find_latest_attempt_in_class(input.student_id, class.id)
        .await?
        .ok_or_else(|| {
            ProgressionError::NotFound(format!(
                "Student {} is not enrolled in class {}",
                input.student_id, class.id
            ))
        })?;

    let write = PeriodRecordWrite {
        class_id: class.id,
        student_id: input.student_id,
        period_number: input.period_number,
        test1: input.scores.test1,
        test2: input.scores.test2,
        practical_exam: input.scores.practical_exam,
        theory_exam: input.scores.theory_exam,
        final_score,
        strengths: normalize_feedback(input.strengths),
        improvements: normalize_feedback(input.improvements),
        written_at: primitive_now_utc(),
    };

    if is_terminal && !attempt.status.is_open() {
        // Replaying the exact stored inputs is still an idempotent overwrite.
        let existing = state
            .store()
            .list_period_records(class.id, input.student_id)
            .await?
            .into_iter()
            .find(|record| record.period_number == input.period_number);
        if let Some(record) = existing.filter(|record| write.matches(record)) {
            metrics::record_period_save(false);
            return Ok(SavedPeriodGrades { record, changed: false, finalize: None });
        }

        tracing::warn!(
            student_id = input.student_id,
            class_id = class.id,
            level_id = level.id,
            status = attempt.status.as_str(),
            "Terminal period save without an open attempt"
        );
        return Err(ProgressionError::InconsistentState(format!(
            "Student {} has no open attempt in class {}; latest attempt is {}",
            input.student_id,
            class.id,
            attempt.status.as_str()
        )));
    }

    let saved = state.store().upsert_period_record(write).await?;
    metrics::record_period_save(saved.changed);
    tracing::debug!(
        student_id = input.student_id,
        class_id = class.id,
        period_number = input.period_number,
        final_score,
        changed = saved.changed,
        "Period record saved"
    );

    let already_evaluated =
        attempt.evaluated_revision.is_some_and(|evaluated| saved.record.revision <= evaluated);
    if input.reassessment && already_evaluated {
        state.store().reopen_evaluation(attempt.id, attempt.version, primitive_now_utc()).await?;
        tracing::info!(
            student_id = input.student_id,
            class_id = class.id,
            level_id = level.id,
            status = attempt.status.as_str(),
            "Terminal record resubmitted for assessment"
        );
    }

    let finalize = if is_terminal && state.settings().progression().auto_finalize {
        Some(evaluate_locked(state, &class, &level, input.student_id).await?)
    } else {
        None
    };

    Ok(SavedPeriodGrades { record: saved.record, changed: saved.changed, finalize })
}

/// Period records of one student in one class, ordered by period number.
pub(crate) async fn get_period_records(
    state: &AppState,
    class_id: i64,
    student_id: i64,
) -> Result<Vec<PeriodRecord>, ProgressionError> {
    require_id("class_id", class_id)?;
    require_id("student_id", student_id)?;

    let (class, _) = load_class_level(state, class_id).await?;
    if state.store().find_latest_attempt_in_class(student_id, class.id).await?.is_none() {
        return Err(ProgressionError::NotFound(format!(
            "Student {student_id} is not enrolled in class {class_id}"
        )));
    }

    let mut records = state.store().list_period_records(class.id, student_id).await?;
    records.sort_by_key(|record| record.period_number);
    Ok(records)
}

fn normalize_feedback(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::LevelStatus;
    use crate::services::progression::{enroll_student, list_level_attempts, FinalizeOutcome};
    use crate::test_support::{memory_state, BASIC_CLASS_ID, BASIC_LEVEL_ID, FINAL_CLASS_ID};

    fn grades(class_id: i64, student_id: i64, period_number: i32, score: f64) -> SavePeriodGrades {
        SavePeriodGrades {
            class_id,
            student_id,
            period_number,
            scores: ComponentScores::new(score, score, score, score),
            strengths: Some("  Boa participação ".to_string()),
            improvements: Some("   ".to_string()),
            reassessment: false,
        }
    }

    #[tokio::test]
    async fn identical_saves_leave_one_record() {
        let state = memory_state().await;
        enroll_student(&state, 1, BASIC_CLASS_ID).await.expect("enroll");

        let first = save_period_grades(&state, grades(BASIC_CLASS_ID, 1, 2, 13.0))
            .await
            .expect("first");
        let second = save_period_grades(&state, grades(BASIC_CLASS_ID, 1, 2, 13.0))
            .await
            .expect("second");

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.record, second.record);
        assert_eq!(first.record.final_score, 13);
        assert_eq!(first.record.strengths.as_deref(), Some("Boa participação"));
        assert_eq!(first.record.improvements, None);
        assert!(first.finalize.is_none());

        let records = get_period_records(&state, BASIC_CLASS_ID, 1).await.expect("records");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn records_come_back_in_period_order() {
        let state = memory_state().await;
        enroll_student(&state, 2, BASIC_CLASS_ID).await.expect("enroll");
        for period in [3, 1, 2] {
            save_period_grades(&state, grades(BASIC_CLASS_ID, 2, period, 12.0))
                .await
                .expect("save");
        }

        let records = get_period_records(&state, BASIC_CLASS_ID, 2).await.expect("records");
        let periods: Vec<i32> = records.iter().map(|record| record.period_number).collect();
        assert_eq!(periods, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn rejects_out_of_range_inputs() {
        let state = memory_state().await;
        enroll_student(&state, 3, BASIC_CLASS_ID).await.expect("enroll");

        let err = save_period_grades(&state, grades(BASIC_CLASS_ID, 3, 5, 12.0))
            .await
            .expect_err("period 5");
        assert!(matches!(err, ProgressionError::Validation(_)));

        let err = save_period_grades(&state, grades(BASIC_CLASS_ID, 3, 0, 12.0))
            .await
            .expect_err("period 0");
        assert!(matches!(err, ProgressionError::Validation(_)));

        let err = save_period_grades(&state, grades(BASIC_CLASS_ID, 3, 1, 20.5))
            .await
            .expect_err("score");
        assert!(matches!(err, ProgressionError::Validation(_)));

        let input = SavePeriodGrades { reassessment: true, ..grades(BASIC_CLASS_ID, 3, 2, 12.0) };
        let err = save_period_grades(&state, input).await.expect_err("non-terminal reassessment");
        assert!(matches!(err, ProgressionError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_pairing_is_not_found() {
        let state = memory_state().await;

        let err = save_period_grades(&state, grades(BASIC_CLASS_ID, 404, 1, 12.0))
            .await
            .expect_err("not enrolled");
        assert!(matches!(err, ProgressionError::NotFound(_)));

        let err = save_period_grades(&state, grades(9_999, 1, 1, 12.0))
            .await
            .expect_err("unknown class");
        assert!(matches!(err, ProgressionError::NotFound(_)));
    }

    #[tokio::test]
    async fn terminal_save_on_closed_attempt_is_inconsistent() {
        let state = memory_state().await;
        enroll_student(&state, 4, FINAL_CLASS_ID).await.expect("enroll");
        let saved = save_period_grades(&state, grades(FINAL_CLASS_ID, 4, 4, 15.0))
            .await
            .expect("terminal");
        let report = saved.finalize.expect("auto finalize");
        assert_eq!(report.outcome, FinalizeOutcome::Transitioned);
        assert_eq!(report.attempt.status, LevelStatus::Passed);

        // Replaying the same inputs stays idempotent.
        let replay = save_period_grades(&state, grades(FINAL_CLASS_ID, 4, 4, 15.0))
            .await
            .expect("replay");
        assert!(!replay.changed);

        let err = save_period_grades(&state, grades(FINAL_CLASS_ID, 4, 4, 9.0))
            .await
            .expect_err("closed attempt");
        assert!(matches!(err, ProgressionError::InconsistentState(_)));
        let records = get_period_records(&state, FINAL_CLASS_ID, 4).await.expect("records");
        assert_eq!(records[0].final_score, 15);
    }

    #[tokio::test]
    async fn concurrent_terminal_saves_apply_one_transition() {
        let state = memory_state().await;
        enroll_student(&state, 5, BASIC_CLASS_ID).await.expect("enroll");

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    save_period_grades(&state, grades(BASIC_CLASS_ID, 5, 4, 8.0)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("save");
        }

        let history = list_level_attempts(&state, 5, BASIC_LEVEL_ID).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempt.status, LevelStatus::Recovery);
        assert_eq!(history[0].transitions.len(), 1);
    }

    #[tokio::test]
    async fn pass_boundary_uses_half_up_rounding() {
        let state = memory_state().await;
        for (student_id, score, expected) in [
            (10, 10.0, LevelStatus::AwaitingRenewal),
            (11, 9.6, LevelStatus::AwaitingRenewal),
            (12, 9.4, LevelStatus::Recovery),
        ] {
            enroll_student(&state, student_id, BASIC_CLASS_ID).await.expect("enroll");
            let saved = save_period_grades(&state, grades(BASIC_CLASS_ID, student_id, 4, score))
                .await
                .expect("save");
            let report = saved.finalize.expect("auto finalize");
            assert_eq!(report.attempt.status, expected, "score {score}");
        }
    }
}

use crate::core::state::AppState;
use crate::services::errors::ProgressionError;
use crate::services::progression::{self, SweepReport};

const SWEEP_BATCH_SIZE: i64 = 500;

/// One batch of pending evaluations; leftovers are picked up on the next tick.
pub(crate) async fn sweep_once(state: &AppState) -> Result<SweepReport, ProgressionError> {
    let report = progression::run_finalize_sweep(state, SWEEP_BATCH_SIZE).await?;

    if report.processed > 0 {
        tracing::info!(
            processed = report.processed,
            transitioned = report.transitioned,
            failed = report.failed,
            "Finalize sweep completed"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::sweep_once;
    use crate::db::types::LevelStatus;
    use crate::services::grade_aggregator::ComponentScores;
    use crate::services::period_records::{save_period_grades, SavePeriodGrades};
    use crate::services::progression::enroll_student;
    use crate::test_support::{memory_state_with, BASIC_CLASS_ID, BASIC_LEVEL_ID};

    #[tokio::test]
    async fn sweep_picks_up_saves_made_without_auto_finalize() {
        let state = memory_state_with(|settings| settings.auto_finalize = false).await;
        for student_id in [1, 2] {
            enroll_student(&state, student_id, BASIC_CLASS_ID).await.expect("enroll");
        }
        save_period_grades(
            &state,
            SavePeriodGrades {
                class_id: BASIC_CLASS_ID,
                student_id: 1,
                period_number: 4,
                scores: ComponentScores::new(17.5, 18.0, 0.0, 0.0),
                strengths: None,
                improvements: None,
                reassessment: false,
            },
        )
        .await
        .expect("save");

        let report = sweep_once(&state).await.expect("sweep");
        assert_eq!(report.processed, 1);
        assert_eq!(report.transitioned, 1);

        let attempt = state
            .store()
            .find_latest_attempt(1, BASIC_LEVEL_ID)
            .await
            .expect("latest")
            .expect("attempt");
        // 0.2 * 17.5 + 0.2 * 18 = 7.1 -> 7
        assert_eq!(attempt.status, LevelStatus::Recovery);
        assert_eq!(attempt.evaluated_revision, Some(1));

        let untouched = state
            .store()
            .find_latest_attempt(2, BASIC_LEVEL_ID)
            .await
            .expect("latest")
            .expect("attempt");
        assert_eq!(untouched.status, LevelStatus::InProgress);
    }
}

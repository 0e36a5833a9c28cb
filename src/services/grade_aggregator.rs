use crate::core::config::PassRule;
use crate::db::models::PeriodRecord;
use crate::services::errors::ProgressionError;

pub(crate) const MIN_COMPONENT_SCORE: f64 = 0.0;
pub(crate) const MAX_COMPONENT_SCORE: f64 = 20.0;
pub(crate) const MAX_FINAL_SCORE: i32 = 20;
/// Lowest level grade that counts as a pass.
pub(crate) const PASS_MARK: i32 = 10;

// Percent weights; they sum to 100.
const TEST1_WEIGHT: f64 = 20.0;
const TEST2_WEIGHT: f64 = 20.0;
const PRACTICAL_EXAM_WEIGHT: f64 = 30.0;
const THEORY_EXAM_WEIGHT: f64 = 30.0;

// Absorbs binary representation error so that e.g. a weighted 9.5 never lands on 9.4999999.
const ROUNDING_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ComponentScores {
    pub(crate) test1: f64,
    pub(crate) test2: f64,
    pub(crate) practical_exam: f64,
    pub(crate) theory_exam: f64,
}

impl ComponentScores {
    pub(crate) fn new(test1: f64, test2: f64, practical_exam: f64, theory_exam: f64) -> Self {
        Self { test1, test2, practical_exam, theory_exam }
    }

    pub(crate) fn validate(&self) -> Result<(), ProgressionError> {
        for (field, value) in [
            ("test1", self.test1),
            ("test2", self.test2),
            ("practical_exam", self.practical_exam),
            ("theory_exam", self.theory_exam),
        ] {
            if !value.is_finite() || !(MIN_COMPONENT_SCORE..=MAX_COMPONENT_SCORE).contains(&value) {
                return Err(ProgressionError::Validation(format!(
                    "{field} must be between {MIN_COMPONENT_SCORE} and {MAX_COMPONENT_SCORE}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Weighted period score: 20% per test, 30% per exam, rounded half up into `0..=20`.
pub(crate) fn compute_final_score(scores: &ComponentScores) -> Result<i32, ProgressionError> {
    scores.validate()?;

    let raw = (TEST1_WEIGHT * scores.test1
        + TEST2_WEIGHT * scores.test2
        + PRACTICAL_EXAM_WEIGHT * scores.practical_exam
        + THEORY_EXAM_WEIGHT * scores.theory_exam)
        / 100.0;

    Ok(round_half_up(raw).clamp(0, MAX_FINAL_SCORE))
}

pub(crate) fn round_half_up(value: f64) -> i32 {
    (value + 0.5 + ROUNDING_EPSILON).floor() as i32
}

/// Level grade under `rule`, or `None` while the records needed for it are missing.
///
/// `records` may be in any order; periods beyond `period_count` are ignored.
pub(crate) fn level_grade(
    rule: PassRule,
    period_count: i32,
    records: &[PeriodRecord],
) -> Option<i32> {
    match rule {
        PassRule::TerminalPeriod => records
            .iter()
            .find(|record| record.period_number == period_count)
            .map(|record| record.final_score),
        PassRule::PeriodAverage => {
            let scores: Vec<i32> = (1..=period_count)
                .map(|period| {
                    records
                        .iter()
                        .find(|record| record.period_number == period)
                        .map(|record| record.final_score)
                })
                .collect::<Option<Vec<_>>>()?;
            if scores.is_empty() {
                return None;
            }
            let sum: i32 = scores.iter().sum();
            Some(round_half_up(f64::from(sum) / scores.len() as f64).clamp(0, MAX_FINAL_SCORE))
        }
    }
}

pub(crate) fn is_passing(grade: i32) -> bool {
    grade >= PASS_MARK
}

/// Rounded share of passed levels, `0` when the course has no levels configured.
pub(crate) fn progress_percent(levels_passed: i64, total_levels: i64) -> i32 {
    if total_levels <= 0 {
        return 0;
    }
    let passed = levels_passed.clamp(0, total_levels);
    round_half_up(passed as f64 / total_levels as f64 * 100.0)
}

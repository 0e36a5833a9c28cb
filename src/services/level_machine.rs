use crate::db::types::{LevelEvent, LevelStatus};
use crate::services::errors::ProgressionError;
use crate::services::grade_aggregator::is_passing;

use LevelEvent::{Fail, Graduate, Pass, Recover, Renew, Withdraw};
use LevelStatus::{AwaitingRenewal, Failed, InProgress, Passed, Recovery, Withdrawn};

/// Every allowed `(from, event) -> to` move of a level attempt.
const TRANSITIONS: &[(LevelStatus, LevelEvent, LevelStatus)] = &[
    (InProgress, Pass, AwaitingRenewal),
    (InProgress, Graduate, Passed),
    (InProgress, Recover, Recovery),
    (InProgress, Fail, Failed),
    (InProgress, Withdraw, Withdrawn),
    (Recovery, Pass, AwaitingRenewal),
    (Recovery, Graduate, Passed),
    (Recovery, Fail, Failed),
    (Recovery, Withdraw, Withdrawn),
    (AwaitingRenewal, Renew, Passed),
    // Leaving before renewal closes the bridge but keeps the pass.
    (AwaitingRenewal, Withdraw, Passed),
];

pub(crate) fn next_status(
    from: LevelStatus,
    event: LevelEvent,
) -> Result<LevelStatus, ProgressionError> {
    TRANSITIONS
        .iter()
        .find(|(state, candidate, _)| *state == from && *candidate == event)
        .map(|(_, _, to)| *to)
        .ok_or(ProgressionError::InvalidTransition { from, event })
}

/// Outcome of evaluating a level grade against an open attempt.
pub(crate) fn assess(
    from: LevelStatus,
    grade: i32,
    recovery_available: bool,
    has_next_level: bool,
) -> LevelEvent {
    if is_passing(grade) {
        return if has_next_level { Pass } else { Graduate };
    }

    if from == InProgress && recovery_available {
        Recover
    } else {
        Fail
    }
}

/// Whether reaching `to` closes the attempt (sets its end date).
pub(crate) fn closes_attempt(to: LevelStatus) -> bool {
    !to.is_open()
}

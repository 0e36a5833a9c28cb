use thiserror::Error;

use crate::db::types::{LevelEvent, LevelStatus};
use crate::repositories::store::StoreError;

#[derive(Debug, Error)]
pub(crate) enum ProgressionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InconsistentState(String),
    #[error("event '{}' is not allowed from status '{}'", .event.as_str(), .from.as_str())]
    InvalidTransition { from: LevelStatus, event: LevelEvent },
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ProgressionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            other => Self::Store(other),
        }
    }
}

pub(crate) fn require_id(field: &'static str, value: i64) -> Result<(), ProgressionError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ProgressionError::Validation(format!("{field} must be a positive integer")))
    }
}

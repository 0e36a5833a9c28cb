use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::state::AppState;
use crate::core::time::{format_optional, format_primitive};
use crate::db::models::LevelAttempt;
use crate::db::types::LevelStatus;
use crate::services::errors::{require_id, ProgressionError};
use crate::services::grade_aggregator::progress_percent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StudentProgress {
    pub(crate) student_id: i64,
    pub(crate) has_progress: bool,
    pub(crate) course_id: Option<i64>,
    pub(crate) course_name: Option<String>,
    pub(crate) current_level: Option<CurrentLevel>,
    pub(crate) history: Vec<LevelHistoryEntry>,
    pub(crate) total_levels: i64,
    pub(crate) levels_passed: i64,
    pub(crate) progress_percent: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CurrentLevel {
    pub(crate) attempt_id: i64,
    pub(crate) level_id: i64,
    pub(crate) level_number: i32,
    pub(crate) level_name: String,
    pub(crate) class_id: Option<i64>,
    pub(crate) class_name: Option<String>,
    pub(crate) attempt_number: i32,
    pub(crate) status: LevelStatus,
    pub(crate) status_label: String,
    pub(crate) start_date: String,
    pub(crate) final_grade: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LevelHistoryEntry {
    pub(crate) attempt_id: i64,
    pub(crate) level_id: i64,
    pub(crate) level_number: i32,
    pub(crate) level_name: String,
    pub(crate) attempt_number: i32,
    pub(crate) attempts_count: i64,
    pub(crate) status: LevelStatus,
    pub(crate) status_label: String,
    pub(crate) final_grade: Option<i32>,
    pub(crate) start_date: String,
    pub(crate) end_date: Option<String>,
}

impl StudentProgress {
    fn empty(student_id: i64) -> Self {
        Self {
            student_id,
            has_progress: false,
            course_id: None,
            course_name: None,
            current_level: None,
            history: Vec::new(),
            total_levels: 0,
            levels_passed: 0,
            progress_percent: 0,
        }
    }
}

/// Projection key for one cache generation of a student.
pub(crate) fn cache_key(student_id: i64, generation: i64) -> String {
    format!("progress:student:{student_id}:{generation}")
}

/// Counter bumped on every invalidation; projections of older generations are never read.
pub(crate) fn generation_key(student_id: i64) -> String {
    format!("progress:student:{student_id}:generation")
}

/// Dashboard projection of a student's ledger; "no data" is a regular result.
pub(crate) async fn get_student_progress(
    state: &AppState,
    student_id: i64,
) -> Result<StudentProgress, ProgressionError> {
    require_id("student_id", student_id)?;

    let ttl = state.settings().progression().progress_cache_ttl_seconds;
    // Read before building so a projection raced by a transition lands in a retired generation.
    let generation = if ttl > 0 { cache_generation(state, student_id).await } else { None };

    if let Some(generation) = generation {
        if let Some(cached) = read_cached(state, student_id, generation).await {
            return Ok(cached);
        }
    }

    let progress = build_progress(state, student_id).await?;

    if let Some(generation) = generation {
        write_cached(state, &progress, generation, ttl).await;
    }

    Ok(progress)
}

pub(crate) async fn invalidate(state: &AppState, student_id: i64) {
    if let Err(err) = state.redis().incr(&generation_key(student_id)).await {
        tracing::warn!(student_id, error = %err, "Failed to invalidate progress cache");
    }
}

async fn cache_generation(state: &AppState, student_id: i64) -> Option<i64> {
    match state.redis().get_string(&generation_key(student_id)).await {
        Ok(raw) => Some(raw.and_then(|value| value.parse().ok()).unwrap_or(0)),
        Err(err) => {
            tracing::warn!(student_id, error = %err, "Failed to read progress cache generation");
            None
        }
    }
}

async fn read_cached(
    state: &AppState,
    student_id: i64,
    generation: i64,
) -> Option<StudentProgress> {
    let payload = match state.redis().get_string(&cache_key(student_id, generation)).await {
        Ok(payload) => payload?,
        Err(err) => {
            tracing::warn!(student_id, error = %err, "Failed to read progress cache");
            return None;
        }
    };

    match serde_json::from_str(&payload) {
        Ok(progress) => Some(progress),
        Err(err) => {
            tracing::warn!(student_id, error = %err, "Discarding malformed progress cache entry");
            None
        }
    }
}

async fn write_cached(state: &AppState, progress: &StudentProgress, generation: i64, ttl: u64) {
    let student_id = progress.student_id;
    let payload = match serde_json::to_string(progress) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(student_id, error = %err, "Failed to serialize student progress");
            return;
        }
    };

    let key = cache_key(student_id, generation);
    if let Err(err) = state.redis().set_string_ex(&key, &payload, ttl).await {
        tracing::warn!(student_id, error = %err, "Failed to cache student progress");
    }
}

async fn build_progress(
    state: &AppState,
    student_id: i64,
) -> Result<StudentProgress, ProgressionError> {
    let attempts = state.store().list_student_attempts(student_id).await?;
    let current = current_attempt(&attempts);
    let Some(course_id) = current
        .or_else(|| attempts.iter().max_by_key(|attempt| (attempt.updated_at, attempt.id)))
        .map(|attempt| attempt.course_id)
    else {
        return Ok(StudentProgress::empty(student_id));
    };

    let course_attempts: Vec<&LevelAttempt> =
        attempts.iter().filter(|attempt| attempt.course_id == course_id).collect();

    let mut attempts_per_level: HashMap<i64, i64> = HashMap::new();
    for attempt in &course_attempts {
        *attempts_per_level.entry(attempt.level_id).or_default() += 1;
    }

    // `list_student_attempts` already orders by level number then attempt number.
    let history: Vec<LevelHistoryEntry> = course_attempts
        .iter()
        .filter(|attempt| !attempt.status.is_current())
        .map(|attempt| LevelHistoryEntry {
            attempt_id: attempt.id,
            level_id: attempt.level_id,
            level_number: attempt.level_number,
            level_name: attempt.level_name.clone(),
            attempt_number: attempt.attempt_number,
            attempts_count: attempts_per_level.get(&attempt.level_id).copied().unwrap_or(1),
            status: attempt.status,
            status_label: attempt.status.label().to_string(),
            final_grade: attempt.final_grade,
            start_date: format_primitive(attempt.start_date),
            end_date: format_optional(attempt.end_date),
        })
        .collect();

    let levels_passed = course_attempts
        .iter()
        .filter(|attempt| attempt.status.counts_as_passed())
        .map(|attempt| attempt.level_id)
        .collect::<BTreeSet<_>>()
        .len() as i64;
    let total_levels = state.store().count_course_levels(course_id).await?;
    let course_name = state.store().find_course(course_id).await?.map(|course| course.name);

    Ok(StudentProgress {
        student_id,
        has_progress: true,
        course_id: Some(course_id),
        course_name,
        current_level: current.map(current_level),
        history,
        total_levels,
        levels_passed,
        progress_percent: progress_percent(levels_passed, total_levels),
    })
}

/// The open attempt if any, otherwise the attempt awaiting renewal.
fn current_attempt(attempts: &[LevelAttempt]) -> Option<&LevelAttempt> {
    let newest = |status_filter: fn(LevelStatus) -> bool| {
        attempts
            .iter()
            .filter(|attempt| status_filter(attempt.status))
            .max_by_key(|attempt| (attempt.start_date, attempt.id))
    };

    newest(LevelStatus::is_open)
        .or_else(|| newest(|status| status == LevelStatus::AwaitingRenewal))
}

fn current_level(attempt: &LevelAttempt) -> CurrentLevel {
    CurrentLevel {
        attempt_id: attempt.id,
        level_id: attempt.level_id,
        level_number: attempt.level_number,
        level_name: attempt.level_name.clone(),
        class_id: attempt.class_id,
        class_name: attempt.class_name.clone(),
        attempt_number: attempt.attempt_number,
        status: attempt.status,
        status_label: attempt.status.label().to_string(),
        start_date: format_primitive(attempt.start_date),
        final_grade: attempt.final_grade,
    }
}

use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::{LevelAttempt, LevelTransition};
use crate::db::types::LevelStatus;
use crate::repositories::store::{AttemptTransition, FinalizeCandidate, NewAttempt};

pub(crate) const COLUMNS: &str = "\
    id, student_id, level_id, attempt_number, status, start_date, end_date, final_grade, \
    class_id, class_name, level_number, level_name, course_id, next_level_id, recovery_used, \
    evaluated_revision, version, updated_at";

const TRANSITION_COLUMNS: &str = "id, attempt_id, from_status, to_status, event, score, created_at";

pub(crate) async fn find_latest_in_class(
    pool: &PgPool,
    student_id: i64,
    class_id: i64,
) -> Result<Option<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "SELECT {COLUMNS}
         FROM level_attempts
         WHERE student_id = $1 AND class_id = $2
         ORDER BY attempt_number DESC, id DESC
         LIMIT 1"
    ))
    .bind(student_id)
    .bind(class_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_latest(
    pool: &PgPool,
    student_id: i64,
    level_id: i64,
) -> Result<Option<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "SELECT {COLUMNS}
         FROM level_attempts
         WHERE student_id = $1 AND level_id = $2
         ORDER BY attempt_number DESC, id DESC
         LIMIT 1"
    ))
    .bind(student_id)
    .bind(level_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_for_level(
    pool: &PgPool,
    student_id: i64,
    level_id: i64,
) -> Result<Vec<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "SELECT {COLUMNS}
         FROM level_attempts
         WHERE student_id = $1 AND level_id = $2
         ORDER BY attempt_number, id"
    ))
    .bind(student_id)
    .bind(level_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_for_student(
    pool: &PgPool,
    student_id: i64,
) -> Result<Vec<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "SELECT {COLUMNS}
         FROM level_attempts
         WHERE student_id = $1
         ORDER BY level_number, attempt_number, id"
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_open_in_class(
    pool: &PgPool,
    class_id: i64,
) -> Result<Vec<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "SELECT {COLUMNS}
         FROM level_attempts
         WHERE class_id = $1 AND status IN ('in_progress', 'recovery')
         ORDER BY student_id"
    ))
    .bind(class_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_transitions(
    pool: &PgPool,
    attempt_id: i64,
) -> Result<Vec<LevelTransition>, sqlx::Error> {
    sqlx::query_as::<_, LevelTransition>(&format!(
        "SELECT {TRANSITION_COLUMNS}
         FROM level_transitions
         WHERE attempt_id = $1
         ORDER BY id"
    ))
    .bind(attempt_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn insert(
    pool: &PgPool,
    attempt: &NewAttempt,
) -> Result<LevelAttempt, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    insert_with(&mut conn, attempt).await
}

/// `None` when the attempt moved on since it was read.
pub(crate) async fn transition(
    pool: &PgPool,
    transition: &AttemptTransition,
) -> Result<Option<LevelAttempt>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let Some(updated) = apply_transition(&mut tx, transition).await? else {
        tx.rollback().await?;
        return Ok(None);
    };
    append_transition_log(&mut tx, transition).await?;

    tx.commit().await?;
    Ok(Some(updated))
}

/// `None` when the attempt is no longer open at `expected_version`.
pub(crate) async fn reopen_evaluation(
    pool: &PgPool,
    attempt_id: i64,
    expected_version: i32,
    at: PrimitiveDateTime,
) -> Result<Option<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "UPDATE level_attempts
         SET evaluated_revision = NULL,
             version = version + 1,
             updated_at = $1
         WHERE id = $2 AND version = $3 AND status IN ('in_progress', 'recovery')
         RETURNING {COLUMNS}"
    ))
    .bind(at)
    .bind(attempt_id)
    .bind(expected_version)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn renew(
    pool: &PgPool,
    transition: &AttemptTransition,
    next: &NewAttempt,
) -> Result<Option<(LevelAttempt, LevelAttempt)>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let Some(closed) = apply_transition(&mut tx, transition).await? else {
        tx.rollback().await?;
        return Ok(None);
    };
    append_transition_log(&mut tx, transition).await?;
    let opened = insert_with(&mut tx, next).await?;

    tx.commit().await?;
    Ok(Some((closed, opened)))
}

pub(crate) async fn list_finalize_candidates(
    pool: &PgPool,
    limit: i64,
    require_every_period: bool,
) -> Result<Vec<FinalizeCandidate>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT la.class_id, la.student_id
         FROM level_attempts la
         JOIN course_levels cl ON cl.id = la.level_id
         JOIN period_records pr
           ON pr.class_id = la.class_id
          AND pr.student_id = la.student_id
          AND pr.period_number = cl.period_count
         WHERE la.status IN ('in_progress', 'recovery')
           AND la.class_id IS NOT NULL
           AND (la.evaluated_revision IS NULL OR pr.revision > la.evaluated_revision)
           AND (NOT $2 OR (
                SELECT COUNT(*)
                FROM period_records done
                WHERE done.class_id = la.class_id
                  AND done.student_id = la.student_id
                  AND done.period_number BETWEEN 1 AND cl.period_count
               ) = cl.period_count)
         ORDER BY la.id
         LIMIT $1",
    )
    .bind(limit)
    .bind(require_every_period)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(class_id, student_id)| FinalizeCandidate { class_id, student_id })
        .collect())
}

async fn insert_with(
    conn: &mut PgConnection,
    attempt: &NewAttempt,
) -> Result<LevelAttempt, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "INSERT INTO level_attempts (
            student_id, level_id, attempt_number, status, start_date, class_id, class_name,
            level_number, level_name, course_id, next_level_id, recovery_used,
            evaluated_revision, version, updated_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,FALSE,$12,1,$5)
         RETURNING {COLUMNS}"
    ))
    .bind(attempt.student_id)
    .bind(attempt.level.id)
    .bind(attempt.attempt_number)
    .bind(LevelStatus::InProgress)
    .bind(attempt.started_at)
    .bind(attempt.class.id)
    .bind(&attempt.class.name)
    .bind(attempt.level.level_number)
    .bind(&attempt.level.name)
    .bind(attempt.level.course_id)
    .bind(attempt.level.next_level_id)
    .bind(attempt.baseline_revision)
    .fetch_one(conn)
    .await
}

async fn apply_transition(
    conn: &mut PgConnection,
    transition: &AttemptTransition,
) -> Result<Option<LevelAttempt>, sqlx::Error> {
    sqlx::query_as::<_, LevelAttempt>(&format!(
        "UPDATE level_attempts
         SET status = $1,
             end_date = COALESCE(end_date, $2),
             final_grade = COALESCE($3, final_grade),
             recovery_used = $4,
             evaluated_revision = COALESCE($5, evaluated_revision),
             version = version + 1,
             updated_at = $6
         WHERE id = $7 AND version = $8 AND status = $9
         RETURNING {COLUMNS}"
    ))
    .bind(transition.to_status)
    .bind(transition.end_date)
    .bind(transition.final_grade)
    .bind(transition.recovery_used)
    .bind(transition.evaluated_revision)
    .bind(transition.at)
    .bind(transition.attempt_id)
    .bind(transition.expected_version)
    .bind(transition.from_status)
    .fetch_optional(conn)
    .await
}

async fn append_transition_log(
    conn: &mut PgConnection,
    transition: &AttemptTransition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO level_transitions (attempt_id, from_status, to_status, event, score, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(transition.attempt_id)
    .bind(transition.from_status)
    .bind(transition.to_status)
    .bind(transition.event)
    .bind(transition.score)
    .bind(transition.at)
    .execute(conn)
    .await?;
    Ok(())
}

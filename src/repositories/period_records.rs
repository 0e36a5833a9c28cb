use sqlx::PgPool;

use crate::db::models::PeriodRecord;
use crate::repositories::store::{PeriodRecordWrite, SavedPeriodRecord};

pub(crate) const COLUMNS: &str = "\
    class_id, student_id, period_number, test1, test2, practical_exam, theory_exam, \
    final_score, strengths, improvements, revision, created_at, updated_at";

/// Overwrites the record only when an input differs, bumping `revision`.
pub(crate) async fn upsert(
    pool: &PgPool,
    write: &PeriodRecordWrite,
) -> Result<SavedPeriodRecord, sqlx::Error> {
    let written = sqlx::query_as::<_, PeriodRecord>(&format!(
        "INSERT INTO period_records (
            class_id, student_id, period_number, test1, test2, practical_exam, theory_exam,
            final_score, strengths, improvements, revision, created_at, updated_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,1,$11,$11)
         ON CONFLICT (class_id, student_id, period_number) DO UPDATE
         SET test1 = EXCLUDED.test1,
             test2 = EXCLUDED.test2,
             practical_exam = EXCLUDED.practical_exam,
             theory_exam = EXCLUDED.theory_exam,
             final_score = EXCLUDED.final_score,
             strengths = EXCLUDED.strengths,
             improvements = EXCLUDED.improvements,
             revision = period_records.revision + 1,
             updated_at = EXCLUDED.updated_at
         WHERE (period_records.test1, period_records.test2, period_records.practical_exam,
                period_records.theory_exam, period_records.final_score,
                period_records.strengths, period_records.improvements)
            IS DISTINCT FROM
               (EXCLUDED.test1, EXCLUDED.test2, EXCLUDED.practical_exam,
                EXCLUDED.theory_exam, EXCLUDED.final_score,
                EXCLUDED.strengths, EXCLUDED.improvements)
         RETURNING {COLUMNS}"
    ))
    .bind(write.class_id)
    .bind(write.student_id)
    .bind(write.period_number)
    .bind(write.test1)
    .bind(write.test2)
    .bind(write.practical_exam)
    .bind(write.theory_exam)
    .bind(write.final_score)
    .bind(write.strengths.as_deref())
    .bind(write.improvements.as_deref())
    .bind(write.written_at)
    .fetch_optional(pool)
    .await?;

    if let Some(record) = written {
        return Ok(SavedPeriodRecord { record, changed: true });
    }

    let record = sqlx::query_as::<_, PeriodRecord>(&format!(
        "SELECT {COLUMNS}
         FROM period_records
         WHERE class_id = $1 AND student_id = $2 AND period_number = $3"
    ))
    .bind(write.class_id)
    .bind(write.student_id)
    .bind(write.period_number)
    .fetch_one(pool)
    .await?;

    Ok(SavedPeriodRecord { record, changed: false })
}

pub(crate) async fn list_for_student(
    pool: &PgPool,
    class_id: i64,
    student_id: i64,
) -> Result<Vec<PeriodRecord>, sqlx::Error> {
    sqlx::query_as::<_, PeriodRecord>(&format!(
        "SELECT {COLUMNS}
         FROM period_records
         WHERE class_id = $1 AND student_id = $2
         ORDER BY period_number"
    ))
    .bind(class_id)
    .bind(student_id)
    .fetch_all(pool)
    .await
}

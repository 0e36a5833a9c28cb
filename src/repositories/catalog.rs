use sqlx::PgPool;

use crate::db::models::{Course, CourseLevel, SchoolClass};

const LEVEL_COLUMNS: &str = "id, course_id, level_number, name, period_count, next_level_id";

pub(crate) async fn find_course(
    pool: &PgPool,
    course_id: i64,
) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>("SELECT id, name FROM courses WHERE id = $1")
        .bind(course_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn count_levels(pool: &PgPool, course_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM course_levels WHERE course_id = $1")
        .bind(course_id)
        .fetch_one(pool)
        .await
}

pub(crate) async fn find_level(
    pool: &PgPool,
    level_id: i64,
) -> Result<Option<CourseLevel>, sqlx::Error> {
    sqlx::query_as::<_, CourseLevel>(&format!(
        "SELECT {LEVEL_COLUMNS} FROM course_levels WHERE id = $1"
    ))
    .bind(level_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_class(
    pool: &PgPool,
    class_id: i64,
) -> Result<Option<SchoolClass>, sqlx::Error> {
    sqlx::query_as::<_, SchoolClass>("SELECT id, level_id, name FROM classes WHERE id = $1")
        .bind(class_id)
        .fetch_optional(pool)
        .await
}

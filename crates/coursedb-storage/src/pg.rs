//! PostgreSQL implementation of [`Store`] on sqlx.

use std::collections::HashMap;

use async_trait::async_trait;
use coursedb_core::{
    AcademicRank, Degree, EntityId, EntityKind, NaturalKey, NewCourse, NewEnrollment, NewEntity,
    NewSchedule,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Row, Transaction};
use tracing::debug;

use crate::{Store, StoreError};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Single-writer PostgreSQL store; every statement runs inside the open batch transaction.
pub struct PgStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::NoOpenBatch)
    }

    async fn resync_table(&mut self, table: &'static str) -> Result<(), StoreError> {
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{table}', 'id'), COALESCE(MAX(id), 1), MAX(id) IS NOT NULL) FROM {table}"
        );
        sqlx::query(&sql).execute(self.conn()?).await?;
        debug!(table, "resynchronized sequence");
        Ok(())
    }
}

const RECORD_SAVEPOINT: &str = "coursedb_record";

#[async_trait]
impl Store for PgStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.tx.is_some() {
            return Err(StoreError::BatchAlreadyOpen);
        }
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoOpenBatch)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoOpenBatch)?;
        tx.rollback().await?;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("SAVEPOINT {RECORD_SAVEPOINT}"))
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("RELEASE SAVEPOINT {RECORD_SAVEPOINT}"))
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {RECORD_SAVEPOINT}"))
            .execute(self.conn()?)
            .await?;
        // ROLLBACK TO keeps the savepoint open.
        self.release_savepoint().await
    }

    async fn find_id(&mut self, key: &NaturalKey) -> Result<Option<EntityId>, StoreError> {
        let conn = self.conn()?;
        let id = match key {
            NaturalKey::Course { code } => {
                sqlx::query_scalar("SELECT id FROM course WHERE code = $1")
                    .bind(code)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            NaturalKey::CourseClass { code, semester_id } => {
                sqlx::query_scalar("SELECT id FROM course_class WHERE code = $1 AND semester_id = $2")
                    .bind(code)
                    .bind(semester_id)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            NaturalKey::Professor { name } => {
                sqlx::query_scalar("SELECT id FROM professor WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            NaturalKey::Student { code } => {
                sqlx::query_scalar("SELECT id FROM student WHERE code = $1")
                    .bind(code)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            NaturalKey::AdministrativeClass { name } => {
                sqlx::query_scalar("SELECT id FROM administrative_class WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            NaturalKey::Faculty { name } => {
                sqlx::query_scalar("SELECT id FROM faculty WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&mut *conn)
                    .await?
            }
        };
        Ok(id)
    }

    async fn insert_if_absent(&mut self, entity: &NewEntity) -> Result<Option<EntityId>, StoreError> {
        let conn = self.conn()?;
        let id = match entity {
            NewEntity::Course(c) => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO course (code, name, english_name, credits, practice_hours, theory_hours, self_learn_hours)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (code) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&c.code)
                .bind(&c.name)
                .bind(&c.english_name)
                .bind(c.credits)
                .bind(c.practice_hours)
                .bind(c.theory_hours)
                .bind(c.self_learn_hours)
                .fetch_optional(&mut *conn)
                .await?
            }
            NewEntity::CourseClass(c) => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO course_class (code, course_id, semester_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (code, semester_id) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&c.code)
                .bind(c.course_id)
                .bind(&c.semester_id)
                .fetch_optional(&mut *conn)
                .await?
            }
            NewEntity::Professor(p) => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO professor (name, academic_rank, degree, faculty_id)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (name) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&p.name)
                .bind(p.academic_rank.map(AcademicRank::label))
                .bind(p.degree.map(Degree::label))
                .bind(p.faculty_id)
                .fetch_optional(&mut *conn)
                .await?
            }
            NewEntity::Student(s) => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO student (code, name, gender, birthday, email, administrative_class_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (code) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&s.code)
                .bind(&s.name)
                .bind(&s.gender)
                .bind(s.birthday)
                .bind(&s.email)
                .bind(s.administrative_class_id)
                .fetch_optional(&mut *conn)
                .await?
            }
            NewEntity::AdministrativeClass(a) => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO administrative_class (name, program_id, advisor_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (name) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&a.name)
                .bind(a.program_id)
                .bind(a.advisor_id)
                .fetch_optional(&mut *conn)
                .await?
            }
            NewEntity::Faculty(f) => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO faculty (name, type)
                    VALUES ($1, $2)
                    ON CONFLICT (name) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&f.name)
                .bind(&f.faculty_type)
                .fetch_optional(&mut *conn)
                .await?
            }
        };
        Ok(id)
    }

    async fn resync_sequence(&mut self, kind: EntityKind) -> Result<(), StoreError> {
        self.resync_table(kind.table()).await
    }

    async fn ensure_semester(&mut self, semester_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO semester (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(semester_id)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn upsert_course(&mut self, course: &NewCourse) -> Result<EntityId, StoreError> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO course (code, name, english_name, credits, practice_hours, theory_hours, self_learn_hours)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (code) DO UPDATE SET
                name = EXCLUDED.name,
                english_name = EXCLUDED.english_name,
                credits = EXCLUDED.credits,
                practice_hours = EXCLUDED.practice_hours,
                theory_hours = EXCLUDED.theory_hours,
                self_learn_hours = EXCLUDED.self_learn_hours
            RETURNING id
            "#,
        )
        .bind(&course.code)
        .bind(&course.name)
        .bind(&course.english_name)
        .bind(course.credits)
        .bind(course.practice_hours)
        .bind(course.theory_hours)
        .bind(course.self_learn_hours)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn link_course_program(
        &mut self,
        course_id: EntityId,
        program_id: EntityId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO course_program (program_id, course_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(program_id)
        .bind(course_id)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn set_prerequisite(
        &mut self,
        course_code: &str,
        prerequisite_code: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE course c1
               SET prerequisite = c2.id
              FROM course c2
             WHERE c1.code = $1 AND c2.code = $2
            "#,
        )
        .bind(course_code)
        .bind(prerequisite_code)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn program_abbreviations(&mut self) -> Result<HashMap<String, EntityId>, StoreError> {
        let rows = sqlx::query("SELECT id, abbreviation FROM program WHERE abbreviation IS NOT NULL")
            .fetch_all(self.conn()?)
            .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let abbreviation: String = row.try_get("abbreviation")?;
            out.insert(abbreviation.trim().to_lowercase(), row.try_get("id")?);
        }
        Ok(out)
    }

    async fn set_advisor(
        &mut self,
        class_name: &str,
        professor_id: EntityId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE administrative_class SET advisor_id = $1 WHERE name = $2")
            .bind(professor_id)
            .bind(class_name)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_schedule(&mut self, schedule: &NewSchedule) -> Result<EntityId, StoreError> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO course_class_schedule (course_class_id, day_of_week, lesson_range, session_type, group_identifier, location)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(schedule.course_class_id)
        .bind(&schedule.day_of_week)
        .bind(&schedule.periods)
        .bind(schedule.session_type.label())
        .bind(&schedule.group_identifier)
        .bind(&schedule.location)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn find_schedule(
        &mut self,
        course_class_id: EntityId,
        group_identifier: &str,
    ) -> Result<Option<EntityId>, StoreError> {
        let id = sqlx::query_scalar(
            r#"
            SELECT id FROM course_class_schedule
             WHERE course_class_id = $1 AND group_identifier = $2
             ORDER BY id
             LIMIT 1
            "#,
        )
        .bind(course_class_id)
        .bind(group_identifier)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn find_matching_schedule(
        &mut self,
        schedule: &NewSchedule,
    ) -> Result<Option<EntityId>, StoreError> {
        let id = sqlx::query_scalar(
            r#"
            SELECT id FROM course_class_schedule
             WHERE course_class_id = $1
               AND day_of_week IS NOT DISTINCT FROM $2
               AND lesson_range = $3
               AND location IS NOT DISTINCT FROM $4
               AND group_identifier IS NOT DISTINCT FROM $5
             ORDER BY id
             LIMIT 1
            "#,
        )
        .bind(schedule.course_class_id)
        .bind(&schedule.day_of_week)
        .bind(&schedule.periods)
        .bind(&schedule.location)
        .bind(&schedule.group_identifier)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn insert_instructor_link(
        &mut self,
        schedule_id: EntityId,
        professor_id: EntityId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO course_schedule_instructor (course_class_schedule_id, professor_id) VALUES ($1, $2)",
        )
        .bind(schedule_id)
        .bind(professor_id)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn instructor_link_exists(
        &mut self,
        schedule_id: EntityId,
        professor_id: EntityId,
    ) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM course_schedule_instructor
                 WHERE course_class_schedule_id = $1 AND professor_id = $2
            )
            "#,
        )
        .bind(schedule_id)
        .bind(professor_id)
        .fetch_one(self.conn()?)
        .await?;
        Ok(exists)
    }

    async fn upsert_enrollment(&mut self, enrollment: &NewEnrollment) -> Result<EntityId, StoreError> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO course_class_enrollment (student_id, course_class_id, enrollment_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (student_id, course_class_id) DO UPDATE SET enrollment_type = EXCLUDED.enrollment_type
            RETURNING id
            "#,
        )
        .bind(enrollment.student_id)
        .bind(enrollment.course_class_id)
        .bind(&enrollment.enrollment_type)
        .fetch_one(self.conn()?)
        .await?;
        self.resync_table("course_class_enrollment").await?;
        Ok(id)
    }

    async fn link_enrollment_schedule(
        &mut self,
        enrollment_id: EntityId,
        schedule_id: EntityId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO student_course_class_schedule (course_class_enrollment_id, course_class_schedule_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(enrollment_id)
        .bind(schedule_id)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a disposable database: DATABASE_URL=postgres://... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn resolves_course_idempotently_against_postgres() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let mut store = PgStore::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        store.begin().await.expect("begin");

        let course = NewEntity::Course(NewCourse::referenced("ZZZ999", "Scratch", 1));
        let first = store.insert_if_absent(&course).await.expect("insert");
        let second = store.insert_if_absent(&course).await.expect("insert again");
        assert!(second.is_none());
        store.resync_sequence(EntityKind::Course).await.expect("resync");
        let found = store.find_id(&course.key()).await.expect("find");
        assert!(first.is_some());
        assert_eq!(found, first);

        store.rollback().await.expect("rollback");
    }
}

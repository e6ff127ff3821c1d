//! Get-or-create resolution of entities by natural key.
//!
//! Lookup first; on a miss, a conflict-tolerant insert followed by a re-read so
//! that a row created by a concurrent writer is adopted rather than reported as
//! a duplicate. The creation-time attributes are only ever used on the insert:
//! a hit returns the existing id untouched.

use chrono::NaiveDate;
use coursedb_core::{
    student_email, EntityId, NewAdministrativeClass, NewCourse, NewCourseClass, NewEntity,
    NewFaculty, NewProfessor, NewStudent, ProfessorName,
};
use coursedb_storage::{Store, StoreError};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("entity not resolved: {0}")]
    EntityNotResolved(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn resolve<S>(store: &mut S, entity: &NewEntity) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    let key = entity.key();
    if key.is_blank() {
        return Err(ResolveError::EntityNotResolved(format!("blank key for {}", key.kind())));
    }
    if let Some(id) = store.find_id(&key).await? {
        return Ok(id);
    }

    let inserted = store.insert_if_absent(entity).await?;
    store.resync_sequence(key.kind()).await?;
    match inserted {
        Some(id) => {
            trace!(%key, id, "created");
            Ok(id)
        }
        None => store.find_id(&key).await?.ok_or_else(|| {
            ResolveError::EntityNotResolved(format!("{key} conflicted on insert but is not readable"))
        }),
    }
}

pub async fn resolve_course<S>(
    store: &mut S,
    code: &str,
    name: &str,
    credits: i32,
) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    resolve(store, &NewEntity::Course(NewCourse::referenced(code, name, credits))).await
}

/// Ensures the semester row before resolving the class within it.
pub async fn resolve_course_class<S>(
    store: &mut S,
    code: &str,
    semester_id: &str,
    course_id: EntityId,
) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    if semester_id.trim().is_empty() {
        return Err(ResolveError::EntityNotResolved(format!("course class {code} has no semester")));
    }
    store.ensure_semester(semester_id).await?;
    resolve(
        store,
        &NewEntity::CourseClass(NewCourseClass {
            code: code.to_string(),
            semester_id: semester_id.to_string(),
            course_id,
        }),
    )
    .await
}

pub async fn resolve_faculty<S>(
    store: &mut S,
    name: &str,
    faculty_type: Option<String>,
) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    resolve(
        store,
        &NewEntity::Faculty(NewFaculty {
            name: name.to_string(),
            faculty_type,
        }),
    )
    .await
}

pub async fn resolve_professor<S>(
    store: &mut S,
    professor: &ProfessorName,
    faculty_id: Option<EntityId>,
) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    let mut attributes = NewProfessor::from(professor);
    attributes.faculty_id = faculty_id;
    resolve(store, &NewEntity::Professor(attributes)).await
}

/// Ids in input order; an empty list cannot be resolved.
pub async fn resolve_professors<S>(
    store: &mut S,
    professors: &[ProfessorName],
) -> Result<Vec<EntityId>, ResolveError>
where
    S: Store + ?Sized,
{
    if professors.is_empty() {
        return Err(ResolveError::EntityNotResolved("empty professor list".into()));
    }
    let mut ids = Vec::with_capacity(professors.len());
    for professor in professors {
        ids.push(resolve_professor(store, professor, None).await?);
    }
    Ok(ids)
}

pub async fn resolve_administrative_class<S>(
    store: &mut S,
    name: &str,
    program_id: Option<EntityId>,
) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    resolve(
        store,
        &NewEntity::AdministrativeClass(NewAdministrativeClass {
            name: name.to_string(),
            program_id,
            advisor_id: None,
        }),
    )
    .await
}

#[derive(Debug, Clone)]
pub struct StudentAttributes<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub gender: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub administrative_class_id: EntityId,
}

pub async fn resolve_student<S>(
    store: &mut S,
    student: StudentAttributes<'_>,
) -> Result<EntityId, ResolveError>
where
    S: Store + ?Sized,
{
    resolve(
        store,
        &NewEntity::Student(NewStudent {
            code: student.code.to_string(),
            name: student.name.to_string(),
            gender: student.gender,
            birthday: student.birthday,
            email: Some(student_email(student.code)),
            administrative_class_id: student.administrative_class_id,
        }),
    )
    .await
}

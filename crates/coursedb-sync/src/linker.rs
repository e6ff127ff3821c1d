//! Association rows: schedules, instructor links, enrollments and their
//! schedule links, prerequisite edges.

use coursedb_core::{CanonicalRecord, EntityId, NewEnrollment, NewSchedule, SessionType, SHARED_GROUP};
use coursedb_storage::{Store, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How schedule and instructor-link rows are written.
///
/// By default every import appends; re-importing a document therefore
/// duplicates its schedules and instructor links. `dedupe_links` reuses an
/// identical schedule row and skips instructor links that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPolicy {
    pub dedupe_links: bool,
}

pub fn schedule_for_record(course_class_id: EntityId, record: &CanonicalRecord) -> NewSchedule {
    NewSchedule {
        course_class_id,
        day_of_week: Some(record.day_of_week.clone()),
        periods: record.periods.clone(),
        location: Some(record.location.clone()),
        session_type: SessionType::classify(record.group_identifier.as_deref()),
        group_identifier: record.group_identifier.clone(),
    }
}

pub async fn create_schedule<S>(
    store: &mut S,
    policy: LinkPolicy,
    schedule: &NewSchedule,
) -> Result<EntityId, StoreError>
where
    S: Store + ?Sized,
{
    if policy.dedupe_links {
        if let Some(id) = store.find_matching_schedule(schedule).await? {
            debug!(schedule_id = id, "reusing identical schedule");
            return Ok(id);
        }
    }
    store.insert_schedule(schedule).await
}

/// Returns the number of link rows written.
pub async fn link_instructors<S>(
    store: &mut S,
    policy: LinkPolicy,
    schedule_id: EntityId,
    professor_ids: &[EntityId],
) -> Result<usize, StoreError>
where
    S: Store + ?Sized,
{
    let mut written = 0;
    for &professor_id in professor_ids {
        if policy.dedupe_links && store.instructor_link_exists(schedule_id, professor_id).await? {
            continue;
        }
        store.insert_instructor_link(schedule_id, professor_id).await?;
        written += 1;
    }
    Ok(written)
}

/// Lowest-id schedule of the class for `group_identifier`, created when absent.
pub async fn resolve_group_schedule<S>(
    store: &mut S,
    course_class_id: EntityId,
    group_identifier: &str,
) -> Result<EntityId, StoreError>
where
    S: Store + ?Sized,
{
    if let Some(id) = store.find_schedule(course_class_id, group_identifier).await? {
        return Ok(id);
    }
    store
        .insert_schedule(&NewSchedule::for_group(course_class_id, group_identifier))
        .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentLinks {
    pub enrollment_id: EntityId,
    /// Group schedule first, then the shared schedule when it is a different row.
    pub schedule_ids: Vec<EntityId>,
    pub new_links: usize,
}

/// Upsert the enrollment and link it to its group's schedule. Any group other
/// than exactly `CL`, blank included, is also linked to the class's shared
/// `CL` schedule.
pub async fn link_enrollment<S>(
    store: &mut S,
    enrollment: &NewEnrollment,
    group_identifier: &str,
) -> Result<EnrollmentLinks, StoreError>
where
    S: Store + ?Sized,
{
    let enrollment_id = store.upsert_enrollment(enrollment).await?;

    let mut schedule_ids = Vec::with_capacity(2);
    if group_identifier != SHARED_GROUP {
        schedule_ids.push(
            resolve_group_schedule(store, enrollment.course_class_id, group_identifier).await?,
        );
    }
    schedule_ids.push(resolve_group_schedule(store, enrollment.course_class_id, SHARED_GROUP).await?);

    let mut new_links = 0;
    for &schedule_id in &schedule_ids {
        if store.link_enrollment_schedule(enrollment_id, schedule_id).await? {
            new_links += 1;
        }
    }

    Ok(EnrollmentLinks {
        enrollment_id,
        schedule_ids,
        new_links,
    })
}

/// Apply (course, prerequisite) pairs; pairs naming an unknown course are dropped.
/// Returns the number of edges set.
pub async fn apply_prerequisites<S>(
    store: &mut S,
    pairs: &[(String, String)],
) -> Result<usize, StoreError>
where
    S: Store + ?Sized,
{
    let mut applied = 0;
    for (course_code, prerequisite_code) in pairs {
        if store.set_prerequisite(course_code, prerequisite_code).await? {
            applied += 1;
        } else {
            debug!(course_code, prerequisite_code, "prerequisite pair dropped");
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursedb_core::{NewAdministrativeClass, NewCourse, NewCourseClass, NewEntity, NewStudent};
    use coursedb_storage::MemoryStore;

    struct Fixture {
        store: MemoryStore,
        student: EntityId,
        class: EntityId,
    }

    async fn fixture() -> Fixture {
        let mut store = MemoryStore::new();
        let admin = store
            .seed(&NewEntity::AdministrativeClass(NewAdministrativeClass {
                name: "QH-2021-I/CQ-C-A".into(),
                program_id: None,
                advisor_id: None,
            }))
            .unwrap();
        let student = store
            .seed(&NewEntity::Student(NewStudent {
                code: "21020001".into(),
                name: "Nguyễn Văn A".into(),
                gender: None,
                birthday: None,
                email: None,
                administrative_class_id: admin,
            }))
            .unwrap();
        let course = store
            .seed(&NewEntity::Course(NewCourse::referenced("INT2204", "OOP", 3)))
            .unwrap();
        let class = store
            .seed(&NewEntity::CourseClass(NewCourseClass {
                code: "INT2204 1".into(),
                semester_id: "2024-2025-1".into(),
                course_id: course,
            }))
            .unwrap();
        store.begin().await.unwrap();
        Fixture {
            store,
            student,
            class,
        }
    }

    fn enrollment(f: &Fixture, kind: &str) -> NewEnrollment {
        NewEnrollment {
            student_id: f.student,
            course_class_id: f.class,
            enrollment_type: kind.into(),
        }
    }

    #[tokio::test]
    async fn practice_group_links_to_group_and_shared_schedule() {
        let mut f = fixture().await;
        let e = enrollment(&f, "Học lần đầu");
        let links = link_enrollment(&mut f.store, &e, "TH1").await.unwrap();
        assert_eq!(links.schedule_ids.len(), 2);
        assert_eq!(links.new_links, 2);

        let tables = f.store.tables();
        let groups = links
            .schedule_ids
            .iter()
            .map(|id| tables.schedules[id].group_identifier.as_deref().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(groups, vec!["TH1", "CL"]);
        assert_eq!(tables.schedules[&links.schedule_ids[0]].session_type, SessionType::Practice);
        assert_eq!(tables.schedules[&links.schedule_ids[1]].session_type, SessionType::Theory);
        assert_eq!(tables.schedules_of_enrollment(links.enrollment_id).len(), 2);
    }

    #[tokio::test]
    async fn shared_group_links_once() {
        let mut f = fixture().await;
        let e = enrollment(&f, "Học lần đầu");
        let links = link_enrollment(&mut f.store, &e, "CL").await.unwrap();
        assert_eq!(links.schedule_ids.len(), 1);
        assert_eq!(f.store.tables().schedules_of_enrollment(links.enrollment_id).len(), 1);
    }

    #[tokio::test]
    async fn resubmitted_enrollment_adds_nothing() {
        let mut f = fixture().await;
        let e = enrollment(&f, "Học lần đầu");
        let first = link_enrollment(&mut f.store, &e, "TH1").await.unwrap();
        let second = link_enrollment(&mut f.store, &e, "TH1").await.unwrap();
        assert_eq!(first.enrollment_id, second.enrollment_id);
        assert_eq!(first.schedule_ids, second.schedule_ids);
        assert_eq!(second.new_links, 0);
        assert_eq!(f.store.tables().enrollments.len(), 1);
        assert_eq!(f.store.tables().enrollment_schedules.len(), 2);
        assert_eq!(f.store.tables().schedules.len(), 2);
    }

    #[tokio::test]
    async fn existing_group_schedule_is_reused() {
        let mut f = fixture().await;
        let existing = f
            .store
            .insert_schedule(&NewSchedule::for_group(f.class, "CL"))
            .await
            .unwrap();
        let e = enrollment(&f, "Học lần đầu");
        let links = link_enrollment(&mut f.store, &e, "CL").await.unwrap();
        assert_eq!(links.schedule_ids, vec![existing]);
    }

    #[tokio::test]
    async fn blank_and_lowercase_groups_get_their_own_schedule_plus_shared() {
        for group in ["", "cl"] {
            let mut f = fixture().await;
            let e = enrollment(&f, "Học lần đầu");
            let links = link_enrollment(&mut f.store, &e, group).await.unwrap();
            assert_eq!(links.new_links, 2, "group {group:?}");

            let tables = f.store.tables();
            let groups = links
                .schedule_ids
                .iter()
                .map(|id| tables.schedules[id].group_identifier.as_deref())
                .collect::<Vec<_>>();
            assert_eq!(groups, vec![Some(group), Some("CL")]);
            assert_eq!(tables.schedules_of_enrollment(links.enrollment_id).len(), 2);
        }
    }

    #[tokio::test]
    async fn prerequisites_need_both_courses() {
        let mut store = MemoryStore::new();
        store.begin().await.unwrap();
        for code in ["A", "B"] {
            store
                .insert_if_absent(&NewEntity::Course(NewCourse::referenced(code, code, 3)))
                .await
                .unwrap();
        }

        let applied = apply_prerequisites(&mut store, &[("A".into(), "C".into())]).await.unwrap();
        assert_eq!(applied, 0);
        assert_eq!(store.tables().prerequisite_of("A"), None);

        let applied = apply_prerequisites(&mut store, &[("A".into(), "B".into())]).await.unwrap();
        assert_eq!(applied, 1);
        assert_eq!(store.tables().prerequisite_of("A"), Some("B"));
    }

    #[tokio::test]
    async fn append_is_the_default_and_dedupe_is_opt_in() {
        let mut f = fixture().await;
        let schedule = NewSchedule {
            course_class_id: f.class,
            day_of_week: Some("2".into()),
            periods: vec![1, 2],
            location: Some("101".into()),
            session_type: SessionType::Theory,
            group_identifier: Some("CL".into()),
        };
        let professor = f
            .store
            .insert_if_absent(&NewEntity::Professor(coursedb_core::NewProfessor {
                name: "A".into(),
                academic_rank: None,
                degree: None,
                faculty_id: None,
            }))
            .await
            .unwrap()
            .unwrap();

        let append = LinkPolicy::default();
        let a = create_schedule(&mut f.store, append, &schedule).await.unwrap();
        let b = create_schedule(&mut f.store, append, &schedule).await.unwrap();
        assert_ne!(a, b);
        link_instructors(&mut f.store, append, a, &[professor]).await.unwrap();
        link_instructors(&mut f.store, append, a, &[professor]).await.unwrap();
        assert_eq!(f.store.tables().instructors_of(a).len(), 2);

        let dedupe = LinkPolicy { dedupe_links: true };
        let c = create_schedule(&mut f.store, dedupe, &schedule).await.unwrap();
        assert_eq!(c, a);
        let written = link_instructors(&mut f.store, dedupe, a, &[professor]).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(f.store.tables().instructors_of(a).len(), 2);
    }
}

//! In-process [`Store`] with PostgreSQL-like semantics: sequences advance on
//! skipped conflict inserts and survive rollback, rollback restores the rows of
//! the batch snapshot, and foreign keys are checked on insert.
//!
//! Used for dry runs and by the test suites; the fault-injection hooks only
//! matter to the latter.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use coursedb_core::{
    EntityId, EntityKind, NaturalKey, NewAdministrativeClass, NewCourse, NewCourseClass,
    NewEnrollment, NewEntity, NewFaculty, NewProfessor, NewSchedule, NewStudent,
};

use crate::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRow {
    pub name: String,
    pub abbreviation: Option<String>,
}

/// Row storage, keyed by surrogate id.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub programs: BTreeMap<EntityId, ProgramRow>,
    pub semesters: BTreeSet<String>,
    pub faculties: BTreeMap<EntityId, NewFaculty>,
    pub professors: BTreeMap<EntityId, NewProfessor>,
    pub courses: BTreeMap<EntityId, NewCourse>,
    /// course id -> prerequisite course id
    pub prerequisites: BTreeMap<EntityId, EntityId>,
    /// (program id, course id)
    pub course_programs: BTreeSet<(EntityId, EntityId)>,
    pub course_classes: BTreeMap<EntityId, NewCourseClass>,
    pub schedules: BTreeMap<EntityId, NewSchedule>,
    /// (schedule id, professor id); duplicates are allowed like the table they mirror.
    pub instructor_links: Vec<(EntityId, EntityId)>,
    pub administrative_classes: BTreeMap<EntityId, NewAdministrativeClass>,
    pub students: BTreeMap<EntityId, NewStudent>,
    pub enrollments: BTreeMap<EntityId, NewEnrollment>,
    /// (enrollment id, schedule id)
    pub enrollment_schedules: BTreeSet<(EntityId, EntityId)>,
}

impl Tables {
    pub fn course_by_code(&self, code: &str) -> Option<(EntityId, &NewCourse)> {
        self.courses
            .iter()
            .find(|(_, c)| c.code == code)
            .map(|(id, c)| (*id, c))
    }

    pub fn professor_by_name(&self, name: &str) -> Option<(EntityId, &NewProfessor)> {
        self.professors
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, p)| (*id, p))
    }

    pub fn course_class(&self, code: &str, semester_id: &str) -> Option<(EntityId, &NewCourseClass)> {
        self.course_classes
            .iter()
            .find(|(_, c)| c.code == code && c.semester_id == semester_id)
            .map(|(id, c)| (*id, c))
    }

    pub fn administrative_class_by_name(&self, name: &str) -> Option<(EntityId, &NewAdministrativeClass)> {
        self.administrative_classes
            .iter()
            .find(|(_, a)| a.name == name)
            .map(|(id, a)| (*id, a))
    }

    pub fn student_by_code(&self, code: &str) -> Option<(EntityId, &NewStudent)> {
        self.students
            .iter()
            .find(|(_, s)| s.code == code)
            .map(|(id, s)| (*id, s))
    }

    /// Schedules of a class in id order.
    pub fn schedules_of(&self, course_class_id: EntityId) -> Vec<(EntityId, &NewSchedule)> {
        self.schedules
            .iter()
            .filter(|(_, s)| s.course_class_id == course_class_id)
            .map(|(id, s)| (*id, s))
            .collect()
    }

    pub fn instructors_of(&self, schedule_id: EntityId) -> Vec<EntityId> {
        self.instructor_links
            .iter()
            .filter(|(s, _)| *s == schedule_id)
            .map(|(_, p)| *p)
            .collect()
    }

    pub fn schedules_of_enrollment(&self, enrollment_id: EntityId) -> Vec<EntityId> {
        self.enrollment_schedules
            .iter()
            .filter(|(e, _)| *e == enrollment_id)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Code of the prerequisite recorded for `course_code`.
    pub fn prerequisite_of(&self, course_code: &str) -> Option<&str> {
        let (id, _) = self.course_by_code(course_code)?;
        let prereq = self.prerequisites.get(&id)?;
        self.courses.get(prereq).map(|c| c.code.as_str())
    }

    fn find(&self, key: &NaturalKey) -> Option<EntityId> {
        match key {
            NaturalKey::Course { code } => self.course_by_code(code).map(|(id, _)| id),
            NaturalKey::CourseClass { code, semester_id } => {
                self.course_class(code, semester_id).map(|(id, _)| id)
            }
            NaturalKey::Professor { name } => self.professor_by_name(name).map(|(id, _)| id),
            NaturalKey::Student { code } => self.student_by_code(code).map(|(id, _)| id),
            NaturalKey::AdministrativeClass { name } => {
                self.administrative_class_by_name(name).map(|(id, _)| id)
            }
            NaturalKey::Faculty { name } => self
                .faculties
                .iter()
                .find(|(_, f)| &f.name == name)
                .map(|(id, _)| *id),
        }
    }

    fn check_references(&self, entity: &NewEntity) -> Result<(), StoreError> {
        let missing = match entity {
            NewEntity::CourseClass(c) => {
                if !self.semesters.contains(&c.semester_id) {
                    Some(format!("semester {}", c.semester_id))
                } else if !self.courses.contains_key(&c.course_id) {
                    Some(format!("course id {}", c.course_id))
                } else {
                    None
                }
            }
            NewEntity::Professor(p) => p
                .faculty_id
                .filter(|id| !self.faculties.contains_key(id))
                .map(|id| format!("faculty id {id}")),
            NewEntity::Student(s) => (!self
                .administrative_classes
                .contains_key(&s.administrative_class_id))
            .then(|| format!("administrative class id {}", s.administrative_class_id)),
            NewEntity::AdministrativeClass(a) => a
                .program_id
                .filter(|id| !self.programs.contains_key(id))
                .map(|id| format!("program id {id}")),
            NewEntity::Course(_) | NewEntity::Faculty(_) => None,
        };
        match missing {
            Some(what) => Err(StoreError::Constraint(format!("{what} does not exist"))),
            None => Ok(()),
        }
    }

    fn insert(&mut self, id: EntityId, entity: &NewEntity) {
        match entity.clone() {
            NewEntity::Course(c) => {
                self.courses.insert(id, c);
            }
            NewEntity::CourseClass(c) => {
                self.course_classes.insert(id, c);
            }
            NewEntity::Professor(p) => {
                self.professors.insert(id, p);
            }
            NewEntity::Student(s) => {
                self.students.insert(id, s);
            }
            NewEntity::AdministrativeClass(a) => {
                self.administrative_classes.insert(id, a);
            }
            NewEntity::Faculty(f) => {
                self.faculties.insert(id, f);
            }
        }
    }

    fn max_id(&self, kind: EntityKind) -> Option<EntityId> {
        match kind {
            EntityKind::Course => self.courses.keys().next_back(),
            EntityKind::CourseClass => self.course_classes.keys().next_back(),
            EntityKind::Professor => self.professors.keys().next_back(),
            EntityKind::Student => self.students.keys().next_back(),
            EntityKind::AdministrativeClass => self.administrative_classes.keys().next_back(),
            EntityKind::Faculty => self.faculties.keys().next_back(),
        }
        .copied()
    }
}

const PROGRAM_SEQ: &str = "program";
const SCHEDULE_SEQ: &str = "course_class_schedule";
const ENROLLMENT_SEQ: &str = "course_class_enrollment";

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Tables,
    snapshot: Option<Tables>,
    record_snapshot: Option<Tables>,
    /// Last value handed out per table.
    sequences: HashMap<&'static str, EntityId>,
    creating_inserts: HashMap<EntityKind, usize>,
    commits: usize,
    writes: usize,
    fail_after_writes: Option<usize>,
    lookup_misses: HashMap<NaturalKey, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Committed program row, inserted outside any batch.
    pub fn with_program(&mut self, name: &str, abbreviation: Option<&str>) -> EntityId {
        let id = self.next_id(PROGRAM_SEQ);
        self.tables.programs.insert(
            id,
            ProgramRow {
                name: name.to_string(),
                abbreviation: abbreviation.map(str::to_string),
            },
        );
        id
    }

    /// Insert a committed row outside any batch, as another writer would have.
    pub fn seed(&mut self, entity: &NewEntity) -> Result<EntityId, StoreError> {
        if let NewEntity::CourseClass(c) = entity {
            self.tables.semesters.insert(c.semester_id.clone());
        }
        self.tables.check_references(entity)?;
        if let Some(id) = self.tables.find(&entity.key()) {
            return Ok(id);
        }
        let id = self.next_id(entity.kind().table());
        self.tables.insert(id, entity);
        Ok(id)
    }

    /// Inserts that actually created a row of `kind`, rolled-back ones included.
    pub fn creating_inserts(&self, kind: EntityKind) -> usize {
        self.creating_inserts.get(&kind).copied().unwrap_or_default()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Every write after the next `n` fails with [`StoreError::Unavailable`].
    pub fn fail_after_writes(&mut self, n: usize) {
        self.fail_after_writes = Some(self.writes + n);
    }

    pub fn clear_faults(&mut self) {
        self.fail_after_writes = None;
        self.lookup_misses.clear();
    }

    /// The next lookup of `key` reports no row, as if it was read before a concurrent insert.
    pub fn simulate_lookup_miss(&mut self, key: NaturalKey) {
        *self.lookup_misses.entry(key).or_default() += 1;
    }

    /// Current value of a table's sequence; the next insert gets this plus one.
    pub fn sequence_value(&self, table: &str) -> EntityId {
        self.sequences.get(table).copied().unwrap_or_default()
    }

    fn next_id(&mut self, table: &'static str) -> EntityId {
        let value = self.sequences.entry(table).or_default();
        *value += 1;
        *value
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.snapshot.is_none() {
            return Err(StoreError::NoOpenBatch);
        }
        Ok(())
    }

    fn write(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.writes += 1;
        match self.fail_after_writes {
            Some(limit) if self.writes > limit => Err(StoreError::Unavailable(format!(
                "injected failure on write {}",
                self.writes
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::BatchAlreadyOpen);
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot.take().ok_or(StoreError::NoOpenBatch)?;
        self.record_snapshot = None;
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.tables = self.snapshot.take().ok_or(StoreError::NoOpenBatch)?;
        self.record_snapshot = None;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.record_snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.record_snapshot.take().is_none() {
            return Err(StoreError::Unavailable("no savepoint to release".into()));
        }
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.tables = self
            .record_snapshot
            .take()
            .ok_or_else(|| StoreError::Unavailable("no savepoint to roll back to".into()))?;
        Ok(())
    }

    async fn find_id(&mut self, key: &NaturalKey) -> Result<Option<EntityId>, StoreError> {
        self.ensure_open()?;
        if let Some(misses) = self.lookup_misses.get_mut(key) {
            if *misses > 0 {
                *misses -= 1;
                return Ok(None);
            }
        }
        Ok(self.tables.find(key))
    }

    async fn insert_if_absent(&mut self, entity: &NewEntity) -> Result<Option<EntityId>, StoreError> {
        self.write()?;
        self.tables.check_references(entity)?;
        let kind = entity.kind();
        let id = self.next_id(kind.table());
        if self.tables.find(&entity.key()).is_some() {
            return Ok(None);
        }
        self.tables.insert(id, entity);
        *self.creating_inserts.entry(kind).or_default() += 1;
        Ok(Some(id))
    }

    async fn resync_sequence(&mut self, kind: EntityKind) -> Result<(), StoreError> {
        self.ensure_open()?;
        let max = self.tables.max_id(kind).unwrap_or_default();
        self.sequences.insert(kind.table(), max);
        Ok(())
    }

    async fn ensure_semester(&mut self, semester_id: &str) -> Result<(), StoreError> {
        self.write()?;
        self.tables.semesters.insert(semester_id.to_string());
        Ok(())
    }

    async fn upsert_course(&mut self, course: &NewCourse) -> Result<EntityId, StoreError> {
        self.write()?;
        let id = self.next_id(EntityKind::Course.table());
        if let Some((existing, _)) = self.tables.course_by_code(&course.code) {
            self.tables.courses.insert(existing, course.clone());
            return Ok(existing);
        }
        self.tables.courses.insert(id, course.clone());
        Ok(id)
    }

    async fn link_course_program(
        &mut self,
        course_id: EntityId,
        program_id: EntityId,
    ) -> Result<(), StoreError> {
        self.write()?;
        if !self.tables.programs.contains_key(&program_id) {
            return Err(StoreError::Constraint(format!("program id {program_id} does not exist")));
        }
        self.tables.course_programs.insert((program_id, course_id));
        Ok(())
    }

    async fn set_prerequisite(
        &mut self,
        course_code: &str,
        prerequisite_code: &str,
    ) -> Result<bool, StoreError> {
        self.write()?;
        let (Some((course, _)), Some((prereq, _))) = (
            self.tables.course_by_code(course_code),
            self.tables.course_by_code(prerequisite_code),
        ) else {
            return Ok(false);
        };
        self.tables.prerequisites.insert(course, prereq);
        Ok(true)
    }

    async fn program_abbreviations(&mut self) -> Result<HashMap<String, EntityId>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .tables
            .programs
            .iter()
            .filter_map(|(id, p)| {
                p.abbreviation
                    .as_ref()
                    .map(|a| (a.trim().to_lowercase(), *id))
            })
            .collect())
    }

    async fn set_advisor(
        &mut self,
        class_name: &str,
        professor_id: EntityId,
    ) -> Result<bool, StoreError> {
        self.write()?;
        let Some((id, _)) = self.tables.administrative_class_by_name(class_name) else {
            return Ok(false);
        };
        if let Some(class) = self.tables.administrative_classes.get_mut(&id) {
            class.advisor_id = Some(professor_id);
        }
        Ok(true)
    }

    async fn insert_schedule(&mut self, schedule: &NewSchedule) -> Result<EntityId, StoreError> {
        self.write()?;
        if !self.tables.course_classes.contains_key(&schedule.course_class_id) {
            return Err(StoreError::Constraint(format!(
                "course class id {} does not exist",
                schedule.course_class_id
            )));
        }
        let id = self.next_id(SCHEDULE_SEQ);
        self.tables.schedules.insert(id, schedule.clone());
        Ok(id)
    }

    async fn find_schedule(
        &mut self,
        course_class_id: EntityId,
        group_identifier: &str,
    ) -> Result<Option<EntityId>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .tables
            .schedules_of(course_class_id)
            .into_iter()
            .find(|(_, s)| s.group_identifier.as_deref() == Some(group_identifier))
            .map(|(id, _)| id))
    }

    async fn find_matching_schedule(
        &mut self,
        schedule: &NewSchedule,
    ) -> Result<Option<EntityId>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .tables
            .schedules_of(schedule.course_class_id)
            .into_iter()
            .find(|(_, s)| {
                s.day_of_week == schedule.day_of_week
                    && s.periods == schedule.periods
                    && s.location == schedule.location
                    && s.group_identifier == schedule.group_identifier
            })
            .map(|(id, _)| id))
    }

    async fn insert_instructor_link(
        &mut self,
        schedule_id: EntityId,
        professor_id: EntityId,
    ) -> Result<(), StoreError> {
        self.write()?;
        if !self.tables.schedules.contains_key(&schedule_id) {
            return Err(StoreError::Constraint(format!("schedule id {schedule_id} does not exist")));
        }
        if !self.tables.professors.contains_key(&professor_id) {
            return Err(StoreError::Constraint(format!("professor id {professor_id} does not exist")));
        }
        self.tables.instructor_links.push((schedule_id, professor_id));
        Ok(())
    }

    async fn instructor_link_exists(
        &mut self,
        schedule_id: EntityId,
        professor_id: EntityId,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        Ok(self
            .tables
            .instructor_links
            .contains(&(schedule_id, professor_id)))
    }

    async fn upsert_enrollment(&mut self, enrollment: &NewEnrollment) -> Result<EntityId, StoreError> {
        self.write()?;
        if !self.tables.students.contains_key(&enrollment.student_id) {
            return Err(StoreError::Constraint(format!(
                "student id {} does not exist",
                enrollment.student_id
            )));
        }
        if !self.tables.course_classes.contains_key(&enrollment.course_class_id) {
            return Err(StoreError::Constraint(format!(
                "course class id {} does not exist",
                enrollment.course_class_id
            )));
        }
        let id = self.next_id(ENROLLMENT_SEQ);
        let existing = self.tables.enrollments.iter_mut().find(|(_, e)| {
            e.student_id == enrollment.student_id && e.course_class_id == enrollment.course_class_id
        });
        let id = match existing {
            Some((existing_id, row)) => {
                row.enrollment_type = enrollment.enrollment_type.clone();
                *existing_id
            }
            None => {
                self.tables.enrollments.insert(id, enrollment.clone());
                id
            }
        };
        let max = self.tables.enrollments.keys().next_back().copied().unwrap_or_default();
        self.sequences.insert(ENROLLMENT_SEQ, max);
        Ok(id)
    }

    async fn link_enrollment_schedule(
        &mut self,
        enrollment_id: EntityId,
        schedule_id: EntityId,
    ) -> Result<bool, StoreError> {
        self.write()?;
        if !self.tables.enrollments.contains_key(&enrollment_id) {
            return Err(StoreError::Constraint(format!("enrollment id {enrollment_id} does not exist")));
        }
        if !self.tables.schedules.contains_key(&schedule_id) {
            return Err(StoreError::Constraint(format!("schedule id {schedule_id} does not exist")));
        }
        Ok(self
            .tables
            .enrollment_schedules
            .insert((enrollment_id, schedule_id)))
    }
}

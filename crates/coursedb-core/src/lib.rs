//! Core domain model for academic record reconciliation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "coursedb-core";

/// Surrogate identifier assigned by the relational store.
pub type EntityId = i64;

/// Group identifier of the shared/theory session common to all groups of a class.
pub const SHARED_GROUP: &str = "CL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Course,
    CourseClass,
    Professor,
    Student,
    AdministrativeClass,
    Faculty,
}

impl EntityKind {
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Course => "course",
            EntityKind::CourseClass => "course_class",
            EntityKind::Professor => "professor",
            EntityKind::Student => "student",
            EntityKind::AdministrativeClass => "administrative_class",
            EntityKind::Faculty => "faculty",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Business-meaningful unique key used to resolve an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NaturalKey {
    Course { code: String },
    CourseClass { code: String, semester_id: String },
    Professor { name: String },
    Student { code: String },
    AdministrativeClass { name: String },
    Faculty { name: String },
}

impl NaturalKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            NaturalKey::Course { .. } => EntityKind::Course,
            NaturalKey::CourseClass { .. } => EntityKind::CourseClass,
            NaturalKey::Professor { .. } => EntityKind::Professor,
            NaturalKey::Student { .. } => EntityKind::Student,
            NaturalKey::AdministrativeClass { .. } => EntityKind::AdministrativeClass,
            NaturalKey::Faculty { .. } => EntityKind::Faculty,
        }
    }

    /// True when any component of the key is blank.
    pub fn is_blank(&self) -> bool {
        match self {
            NaturalKey::Course { code } | NaturalKey::Student { code } => code.trim().is_empty(),
            NaturalKey::CourseClass { code, semester_id } => {
                code.trim().is_empty() || semester_id.trim().is_empty()
            }
            NaturalKey::Professor { name }
            | NaturalKey::AdministrativeClass { name }
            | NaturalKey::Faculty { name } => name.trim().is_empty(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Course { code } => write!(f, "course {code}"),
            NaturalKey::CourseClass { code, semester_id } => {
                write!(f, "course class {code} ({semester_id})")
            }
            NaturalKey::Professor { name } => write!(f, "professor {name}"),
            NaturalKey::Student { code } => write!(f, "student {code}"),
            NaturalKey::AdministrativeClass { name } => write!(f, "administrative class {name}"),
            NaturalKey::Faculty { name } => write!(f, "faculty {name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcademicRank {
    Professor,
    AssociateProfessor,
}

impl AcademicRank {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "GS" => Some(AcademicRank::Professor),
            "PGS" => Some(AcademicRank::AssociateProfessor),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AcademicRank::Professor => "Giáo sư",
            AcademicRank::AssociateProfessor => "Phó giáo sư",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Degree {
    DoctorOfScience,
    Doctor,
    Master,
}

impl Degree {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "TSKH" => Some(Degree::DoctorOfScience),
            "TS" => Some(Degree::Doctor),
            "ThS" => Some(Degree::Master),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Degree::DoctorOfScience => "Tiến sĩ khoa học",
            Degree::Doctor => "Tiến sĩ",
            Degree::Master => "Thạc sĩ",
        }
    }
}

/// Session type derived from a schedule's group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Theory,
    Practice,
    Unspecified,
}

impl SessionType {
    /// `CL`/`LT` (any case, surrounding whitespace ignored) are theory sessions,
    /// any other non-blank group is a practice session.
    pub fn classify(group_identifier: Option<&str>) -> Self {
        let group = group_identifier.map(str::trim).unwrap_or_default();
        if group.is_empty() {
            SessionType::Unspecified
        } else if group.eq_ignore_ascii_case("CL") || group.eq_ignore_ascii_case("LT") {
            SessionType::Theory
        } else {
            SessionType::Practice
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionType::Theory => "Lý thuyết",
            SessionType::Practice => "Thực hành",
            SessionType::Unspecified => "",
        }
    }
}

/// A professor name with its academic-rank/degree prefix split off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessorName {
    pub name: String,
    pub academic_rank: Option<AcademicRank>,
    pub degree: Option<Degree>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    pub code: String,
    pub name: String,
    pub english_name: Option<String>,
    pub credits: i32,
    pub practice_hours: i32,
    pub theory_hours: i32,
    pub self_learn_hours: i32,
}

impl NewCourse {
    /// Course known only from a schedule or enrollment row.
    pub fn referenced(code: impl Into<String>, name: impl Into<String>, credits: i32) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            english_name: None,
            credits,
            practice_hours: 0,
            theory_hours: 0,
            self_learn_hours: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourseClass {
    pub code: String,
    pub semester_id: String,
    pub course_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfessor {
    pub name: String,
    pub academic_rank: Option<AcademicRank>,
    pub degree: Option<Degree>,
    pub faculty_id: Option<EntityId>,
}

impl From<&ProfessorName> for NewProfessor {
    fn from(value: &ProfessorName) -> Self {
        Self {
            name: value.name.clone(),
            academic_rank: value.academic_rank,
            degree: value.degree,
            faculty_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub code: String,
    pub name: String,
    pub gender: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub email: Option<String>,
    pub administrative_class_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdministrativeClass {
    pub name: String,
    pub program_id: Option<EntityId>,
    pub advisor_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFaculty {
    pub name: String,
    pub faculty_type: Option<String>,
}

/// Creation-time attributes of a resolvable entity; the natural key is derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewEntity {
    Course(NewCourse),
    CourseClass(NewCourseClass),
    Professor(NewProfessor),
    Student(NewStudent),
    AdministrativeClass(NewAdministrativeClass),
    Faculty(NewFaculty),
}

impl NewEntity {
    pub fn key(&self) -> NaturalKey {
        match self {
            NewEntity::Course(c) => NaturalKey::Course {
                code: c.code.clone(),
            },
            NewEntity::CourseClass(c) => NaturalKey::CourseClass {
                code: c.code.clone(),
                semester_id: c.semester_id.clone(),
            },
            NewEntity::Professor(p) => NaturalKey::Professor {
                name: p.name.clone(),
            },
            NewEntity::Student(s) => NaturalKey::Student {
                code: s.code.clone(),
            },
            NewEntity::AdministrativeClass(a) => NaturalKey::AdministrativeClass {
                name: a.name.clone(),
            },
            NewEntity::Faculty(f) => NaturalKey::Faculty {
                name: f.name.clone(),
            },
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub course_class_id: EntityId,
    pub day_of_week: Option<String>,
    pub periods: Vec<i32>,
    pub location: Option<String>,
    pub session_type: SessionType,
    pub group_identifier: Option<String>,
}

impl NewSchedule {
    /// Schedule known only by its group, as referenced from an enrollment.
    pub fn for_group(course_class_id: EntityId, group_identifier: &str) -> Self {
        Self {
            course_class_id,
            day_of_week: None,
            periods: Vec::new(),
            location: None,
            session_type: SessionType::classify(Some(group_identifier)),
            group_identifier: Some(group_identifier.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEnrollment {
    pub student_id: EntityId,
    pub course_class_id: EntityId,
    pub enrollment_type: String,
}

/// Format-independent schedule row produced by the format adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub course_code: String,
    pub course_class_code: String,
    pub course_name: String,
    pub credit: i32,
    pub capacity: Option<i32>,
    pub professors: Vec<ProfessorName>,
    pub day_of_week: String,
    pub periods: Vec<i32>,
    pub location: String,
    pub group_identifier: Option<String>,
}

/// One course row of a program catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub course: NewCourse,
    pub prerequisite_code: Option<String>,
}

/// One row of a term's enrollment grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRow {
    pub student_code: String,
    pub student_name: String,
    pub student_birthday: Option<NaiveDate>,
    pub administrative_class: String,
    pub course_class_code: String,
    pub course_name: String,
    pub group_identifier: String,
    pub credits: i32,
    pub enrollment_type: String,
}

impl EnrollmentRow {
    /// The course code is the first whitespace-separated token of the class code.
    pub fn course_code(&self) -> &str {
        self.course_class_code
            .split_whitespace()
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessorRosterRow {
    pub professor: ProfessorName,
    pub faculty: String,
    pub faculty_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRosterRow {
    pub code: String,
    pub name: String,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<String>,
    pub administrative_class: String,
    pub program_abbreviation: String,
}

impl StudentRosterRow {
    pub fn email(&self) -> String {
        student_email(&self.code)
    }
}

/// Institutional mailbox of a student code.
pub fn student_email(code: &str) -> String {
    format!("{code}@vnu.edu.vn")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorAssignment {
    pub advisor_name: String,
    pub class_name: String,
}

/// Record-level fault: the record is skipped and counted, the batch carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordFault {
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("unresolved dependency: {0}")]
    UnresolvedDependency(String),
}

impl RecordFault {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    pub fn unresolved(msg: impl Into<String>) -> Self {
        Self::UnresolvedDependency(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_identifier_classification() {
        for theory in ["CL", "cl", "LT", " lt "] {
            assert_eq!(SessionType::classify(Some(theory)), SessionType::Theory, "{theory:?}");
        }
        assert_eq!(SessionType::classify(Some("TH1")), SessionType::Practice);
        assert_eq!(SessionType::classify(Some("")), SessionType::Unspecified);
        assert_eq!(SessionType::classify(Some("   ")), SessionType::Unspecified);
        assert_eq!(SessionType::classify(None), SessionType::Unspecified);
        assert_eq!(SessionType::Theory.label(), "Lý thuyết");
        assert_eq!(SessionType::Unspecified.label(), "");
    }

    #[test]
    fn entity_key_follows_attributes() {
        let entity = NewEntity::CourseClass(NewCourseClass {
            code: "INT101_1".into(),
            semester_id: "2023-2024-1".into(),
            course_id: 7,
        });
        assert_eq!(entity.kind(), EntityKind::CourseClass);
        assert_eq!(
            entity.key(),
            NaturalKey::CourseClass {
                code: "INT101_1".into(),
                semester_id: "2023-2024-1".into()
            }
        );
        assert!(NaturalKey::Professor { name: "  ".into() }.is_blank());
    }

    #[test]
    fn enrollment_course_code_is_first_token() {
        let row = EnrollmentRow {
            student_code: "21020001".into(),
            student_name: "A".into(),
            student_birthday: None,
            administrative_class: "QH-2021-I/CQ-C-A".into(),
            course_class_code: "INT2204 1".into(),
            course_name: "OOP".into(),
            group_identifier: "CL".into(),
            credits: 3,
            enrollment_type: "Học lần đầu".into(),
        };
        assert_eq!(row.course_code(), "INT2204");
    }

    #[test]
    fn prefix_vocabulary_maps_to_labels() {
        assert_eq!(AcademicRank::from_prefix("PGS").map(AcademicRank::label), Some("Phó giáo sư"));
        assert_eq!(Degree::from_prefix("TSKH").map(Degree::label), Some("Tiến sĩ khoa học"));
        assert_eq!(Degree::from_prefix("Dr"), None);
    }
}

//! Relational store boundary + HTTP page fetching for coursedb.
//!
//! [`Store`] is the contract the reconciliation engine writes through. It
//! exposes conflict-tolerant primitives ("insert, ignore-or-update on key
//! conflict, return identifier") plus explicit sequence resynchronization, and
//! scopes every write to an open batch transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use coursedb_core::{
    EntityId, EntityKind, NaturalKey, NewCourse, NewEnrollment, NewEntity, NewSchedule,
};
use thiserror::Error;

pub mod fetch;
pub mod memory;
pub mod pg;

pub use fetch::{FetchError, HttpClientConfig, HttpFetcher};
pub use memory::MemoryStore;
pub use pg::{PgStore, MIGRATOR};

pub const CRATE_NAME: &str = "coursedb-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no batch transaction is open")]
    NoOpenBatch,
    #[error("a batch transaction is already open")]
    BatchAlreadyOpen,
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send {
    /// Open the batch transaction every subsequent write runs in.
    async fn begin(&mut self) -> Result<(), StoreError>;
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Mark the start of one record's writes inside the open batch.
    async fn savepoint(&mut self) -> Result<(), StoreError>;
    async fn release_savepoint(&mut self) -> Result<(), StoreError>;
    /// Undo every write since [`Store::savepoint`] and drop the mark; sequence
    /// values already handed out stay consumed.
    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    async fn find_id(&mut self, key: &NaturalKey) -> Result<Option<EntityId>, StoreError>;

    /// Insert unless the natural key already exists; `None` when the insert was skipped.
    async fn insert_if_absent(&mut self, entity: &NewEntity) -> Result<Option<EntityId>, StoreError>;

    /// Move the surrogate sequence of `kind` to the current maximum id.
    async fn resync_sequence(&mut self, kind: EntityKind) -> Result<(), StoreError>;

    async fn ensure_semester(&mut self, semester_id: &str) -> Result<(), StoreError>;

    /// Catalog upsert: insert or overwrite every non-key attribute.
    async fn upsert_course(&mut self, course: &NewCourse) -> Result<EntityId, StoreError>;

    async fn link_course_program(
        &mut self,
        course_id: EntityId,
        program_id: EntityId,
    ) -> Result<(), StoreError>;

    /// Point `course_code` at `prerequisite_code`; `false` unless both courses exist.
    async fn set_prerequisite(
        &mut self,
        course_code: &str,
        prerequisite_code: &str,
    ) -> Result<bool, StoreError>;

    /// Program ids keyed by lower-cased abbreviation.
    async fn program_abbreviations(&mut self) -> Result<HashMap<String, EntityId>, StoreError>;

    /// `false` when no administrative class has that name.
    async fn set_advisor(
        &mut self,
        class_name: &str,
        professor_id: EntityId,
    ) -> Result<bool, StoreError>;

    async fn insert_schedule(&mut self, schedule: &NewSchedule) -> Result<EntityId, StoreError>;

    /// Lowest-id schedule of a class carrying `group_identifier`.
    async fn find_schedule(
        &mut self,
        course_class_id: EntityId,
        group_identifier: &str,
    ) -> Result<Option<EntityId>, StoreError>;

    /// Lowest-id schedule identical in class, day, periods, location and group.
    async fn find_matching_schedule(
        &mut self,
        schedule: &NewSchedule,
    ) -> Result<Option<EntityId>, StoreError>;

    async fn insert_instructor_link(
        &mut self,
        schedule_id: EntityId,
        professor_id: EntityId,
    ) -> Result<(), StoreError>;

    async fn instructor_link_exists(
        &mut self,
        schedule_id: EntityId,
        professor_id: EntityId,
    ) -> Result<bool, StoreError>;

    /// Insert, or update only the enrollment type of the existing (student, class) row.
    async fn upsert_enrollment(&mut self, enrollment: &NewEnrollment) -> Result<EntityId, StoreError>;

    /// `false` when the (enrollment, schedule) link already existed.
    async fn link_enrollment_schedule(
        &mut self,
        enrollment_id: EntityId,
        schedule_id: EntityId,
    ) -> Result<bool, StoreError>;
}

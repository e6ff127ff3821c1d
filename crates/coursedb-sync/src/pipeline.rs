//! Reconciliation runs: adapt -> resolve -> link, one transaction per batch.
//!
//! Every record runs under a savepoint: a record-level fault rolls back to it,
//! so a skipped record leaves no rows behind. Anything that fails the batch
//! (store errors, fetch errors) rolls the open batch back and ends the run;
//! batches committed before that stay committed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use coursedb_adapters::{
    enrollment_table_rows, parse_advisor_info, parse_catalog_row, parse_enrollment_row,
    parse_professor_name, parse_professor_roster_row, parse_student_roster_row, ClassNameMap,
    ExtractedDocument, RawRow, ScheduleRecords, TermFormat,
};
use coursedb_core::{CanonicalRecord, EntityId, EntityKind, NaturalKey, NewEnrollment, RecordFault};
use coursedb_storage::{HttpFetcher, Store, StoreError};
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::EnrollmentSource;
use crate::linker::{self, LinkPolicy};
use crate::resolver::{self, ResolveError, StudentAttributes};
use crate::{IngestError, RunKind, RunSummary};

/// One page of enrollment grid rows per call; pages are numbered from 1.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, run_id: Uuid, page: usize) -> Result<Vec<RawRow>, IngestError>;
}

/// Enrollment grid pages of one remote term.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    fetcher: HttpFetcher,
    source: EnrollmentSource,
    term_id: String,
}

impl HttpPageSource {
    pub fn new(fetcher: HttpFetcher, source: EnrollmentSource, term_id: impl Into<String>) -> Self {
        Self {
            fetcher,
            source,
            term_id: term_id.into(),
        }
    }

    pub fn plan(&self) -> CrawlPlan {
        CrawlPlan {
            max_pages: self.source.max_pages,
            page_size: self.source.page_size,
        }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, run_id: Uuid, page: usize) -> Result<Vec<RawRow>, IngestError> {
        let url = self.source.page_url(&self.term_id, page);
        let html = self.fetcher.fetch_text(run_id, "enrollment", &url).await?;
        Ok(enrollment_table_rows(&html)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlPlan {
    pub max_pages: usize,
    /// A page shorter than this is the last one.
    pub page_size: usize,
}

impl Default for CrawlPlan {
    fn default() -> Self {
        Self {
            max_pages: 5,
            page_size: 1000,
        }
    }
}

enum StepError {
    Record(RecordFault),
    Batch(IngestError),
}

impl From<RecordFault> for StepError {
    fn from(value: RecordFault) -> Self {
        StepError::Record(value)
    }
}

impl From<StoreError> for StepError {
    fn from(value: StoreError) -> Self {
        StepError::Batch(IngestError::StoreFailure(value))
    }
}

impl From<ResolveError> for StepError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::EntityNotResolved(what) => {
                StepError::Record(RecordFault::UnresolvedDependency(what))
            }
            ResolveError::Store(err) => StepError::Batch(IngestError::StoreFailure(err)),
        }
    }
}

/// Rows that are not records at all (headings, separators) are `Ignored` and not counted.
enum Step {
    Applied,
    Ignored,
}

struct Run {
    run_id: Uuid,
    kind: RunKind,
    started_at: chrono::DateTime<Utc>,
    processed: usize,
    skipped: usize,
    batches_committed: usize,
}

impl Run {
    fn start(kind: RunKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            started_at: Utc::now(),
            processed: 0,
            skipped: 0,
            batches_committed: 0,
        }
    }

    fn span(&self) -> Span {
        info_span!("reconcile", run_id = %self.run_id, kind = %self.kind)
    }

    fn finish(self) -> RunSummary {
        let summary = RunSummary {
            run_id: self.run_id,
            kind: self.kind,
            started_at: self.started_at,
            finished_at: Utc::now(),
            processed: self.processed,
            skipped: self.skipped,
            batches_committed: self.batches_committed,
        };
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            batches = summary.batches_committed,
            "run finished"
        );
        summary
    }
}

pub struct ReconcilePipeline<S> {
    store: S,
    policy: LinkPolicy,
}

impl<S: Store> ReconcilePipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: LinkPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Import one program's catalog page in a single transaction; prerequisites
    /// are applied after every course row of the page exists.
    pub async fn import_catalog(
        &mut self,
        program_id: EntityId,
        rows: &[RawRow],
    ) -> Result<RunSummary, IngestError> {
        let mut run = Run::start(RunKind::Catalog);
        let span = run.span();
        async move {
            self.begin().await?;
            let mut prerequisites = Vec::new();
            for cells in rows {
                self.open_record().await?;
                let outcome = self.catalog_row(program_id, cells, &mut prerequisites).await;
                self.settle(outcome, &mut run).await?;
            }
            match linker::apply_prerequisites(&mut self.store, &prerequisites).await {
                Ok(applied) => debug!(applied, pending = prerequisites.len(), "prerequisites applied"),
                Err(err) => return Err(self.abandon(err.into()).await),
            }
            self.commit(&mut run).await?;
            Ok(run.finish())
        }
        .instrument(span)
        .await
    }

    /// Import extracted schedule documents, one transaction per document. Every
    /// document's format tag is checked before anything is written.
    pub async fn import_schedules(
        &mut self,
        documents: &[ExtractedDocument],
    ) -> Result<RunSummary, IngestError> {
        let mut run = Run::start(RunKind::Schedules);
        let span = run.span();
        async move {
            let mut plan = Vec::with_capacity(documents.len());
            for document in documents {
                let semester_id = document.semester_id.clone().ok_or_else(|| {
                    IngestError::Config("schedule document without a semester id".into())
                })?;
                let tag = document.format_tag().unwrap_or(semester_id.as_str());
                let format = TermFormat::from_tag(tag)?;
                plan.push((semester_id, format, document.raw_pages()));
            }

            for (semester_id, format, pages) in &plan {
                self.begin().await?;
                let mut records = ScheduleRecords::new(*format, pages.iter().flatten());
                for record in records.by_ref() {
                    self.open_record().await?;
                    let outcome = self.schedule_record(semester_id, &record).await;
                    self.settle(outcome, &mut run).await?;
                }
                if records.dropped() > 0 {
                    debug!(semester_id, dropped = records.dropped(), "rows dropped by format adapter");
                }
                run.skipped += records.dropped();
                self.commit(&mut run).await?;
            }
            Ok(run.finish())
        }
        .instrument(span)
        .await
    }

    /// Crawl enrollment grid pages for one semester, committing once per page.
    /// Stops at the page cap, on an empty page or on a short page.
    pub async fn crawl_enrollments<P>(
        &mut self,
        source: &P,
        semester_id: &str,
        plan: CrawlPlan,
    ) -> Result<RunSummary, IngestError>
    where
        P: PageSource + ?Sized,
    {
        let mut run = Run::start(RunKind::Enrollments);
        let span = run.span();
        async move {
            for page in 1..=plan.max_pages {
                let rows = source.fetch_page(run.run_id, page).await?;
                if rows.is_empty() {
                    info!(page, "no rows, stopping");
                    break;
                }

                self.begin().await?;
                for cells in &rows {
                    self.open_record().await?;
                    let outcome = self.enrollment_row(semester_id, cells).await;
                    self.settle(outcome, &mut run).await?;
                }
                self.commit(&mut run).await?;
                info!(page, rows = rows.len(), "page committed");

                if rows.len() < plan.page_size {
                    break;
                }
            }
            Ok(run.finish())
        }
        .instrument(span)
        .await
    }

    /// Staff directory rows: faculties and professors, get-or-create.
    pub async fn import_professors(&mut self, rows: &[RawRow]) -> Result<RunSummary, IngestError> {
        let mut run = Run::start(RunKind::Professors);
        let span = run.span();
        async move {
            self.begin().await?;
            for cells in rows {
                self.open_record().await?;
                let outcome = self.professor_row(cells).await;
                self.settle(outcome, &mut run).await?;
            }
            self.commit(&mut run).await?;
            Ok(run.finish())
        }
        .instrument(span)
        .await
    }

    /// Student roster pages; the first row of every page is its header.
    pub async fn import_students(&mut self, pages: &[Vec<RawRow>]) -> Result<RunSummary, IngestError> {
        let mut run = Run::start(RunKind::Students);
        let span = run.span();
        async move {
            self.begin().await?;
            let programs = match self.store.program_abbreviations().await {
                Ok(programs) => programs,
                Err(err) => return Err(self.abandon(err.into()).await),
            };
            for cells in pages.iter().flat_map(|page| page.iter().skip(1)) {
                self.open_record().await?;
                let outcome = self.student_row(cells, &programs).await;
                self.settle(outcome, &mut run).await?;
            }
            self.commit(&mut run).await?;
            Ok(run.finish())
        }
        .instrument(span)
        .await
    }

    /// Advisor listing headings, resolved through the run's class-name table.
    pub async fn assign_advisors(
        &mut self,
        headings: &[String],
        classes: &ClassNameMap,
    ) -> Result<RunSummary, IngestError> {
        let mut run = Run::start(RunKind::Advisors);
        let span = run.span();
        async move {
            self.begin().await?;
            for heading in headings {
                self.open_record().await?;
                let outcome = self.advisor_heading(heading, classes).await;
                self.settle(outcome, &mut run).await?;
            }
            self.commit(&mut run).await?;
            Ok(run.finish())
        }
        .instrument(span)
        .await
    }

    async fn catalog_row(
        &mut self,
        program_id: EntityId,
        cells: &RawRow,
        prerequisites: &mut Vec<(String, String)>,
    ) -> Result<Step, StepError> {
        let Some(row) = parse_catalog_row(cells)? else {
            return Ok(Step::Ignored);
        };
        let course_id = self.store.upsert_course(&row.course).await?;
        self.store.resync_sequence(EntityKind::Course).await?;
        self.store.link_course_program(course_id, program_id).await?;
        if let Some(prerequisite) = row.prerequisite_code {
            prerequisites.push((row.course.code, prerequisite));
        }
        Ok(Step::Applied)
    }

    async fn schedule_record(
        &mut self,
        semester_id: &str,
        record: &CanonicalRecord,
    ) -> Result<Step, StepError> {
        let store = &mut self.store;
        let professors = resolver::resolve_professors(store, &record.professors).await?;
        let course =
            resolver::resolve_course(store, &record.course_code, &record.course_name, record.credit)
                .await?;
        let class =
            resolver::resolve_course_class(store, &record.course_class_code, semester_id, course)
                .await?;
        let schedule = linker::schedule_for_record(class, record);
        let schedule_id = linker::create_schedule(store, self.policy, &schedule).await?;
        linker::link_instructors(store, self.policy, schedule_id, &professors).await?;
        trace!(class = %record.course_class_code, schedule_id, "schedule linked");
        Ok(Step::Applied)
    }

    async fn enrollment_row(&mut self, semester_id: &str, cells: &RawRow) -> Result<Step, StepError> {
        let row = parse_enrollment_row(cells)?;
        let store = &mut self.store;
        let admin =
            resolver::resolve_administrative_class(store, &row.administrative_class, None).await?;
        let student = resolver::resolve_student(
            store,
            StudentAttributes {
                code: &row.student_code,
                name: &row.student_name,
                gender: None,
                birthday: row.student_birthday,
                administrative_class_id: admin,
            },
        )
        .await?;
        let course =
            resolver::resolve_course(store, row.course_code(), &row.course_name, row.credits).await?;
        let class =
            resolver::resolve_course_class(store, &row.course_class_code, semester_id, course)
                .await?;
        let links = linker::link_enrollment(
            store,
            &NewEnrollment {
                student_id: student,
                course_class_id: class,
                enrollment_type: row.enrollment_type.clone(),
            },
            &row.group_identifier,
        )
        .await?;
        trace!(
            student = %row.student_code,
            enrollment_id = links.enrollment_id,
            new_links = links.new_links,
            "enrollment linked"
        );
        Ok(Step::Applied)
    }

    async fn professor_row(&mut self, cells: &RawRow) -> Result<Step, StepError> {
        let Some(row) = parse_professor_roster_row(cells) else {
            return Ok(Step::Ignored);
        };
        let store = &mut self.store;
        let faculty_id = if row.faculty.is_empty() {
            None
        } else {
            Some(resolver::resolve_faculty(store, &row.faculty, row.faculty_type.clone()).await?)
        };
        resolver::resolve_professor(store, &row.professor, faculty_id).await?;
        Ok(Step::Applied)
    }

    async fn student_row(
        &mut self,
        cells: &RawRow,
        programs: &HashMap<String, EntityId>,
    ) -> Result<Step, StepError> {
        let Some(row) = parse_student_roster_row(cells) else {
            return Ok(Step::Ignored);
        };
        let program_id = programs
            .get(&row.program_abbreviation.trim().to_lowercase())
            .copied();
        let store = &mut self.store;
        let admin =
            resolver::resolve_administrative_class(store, &row.administrative_class, program_id)
                .await?;
        resolver::resolve_student(
            store,
            StudentAttributes {
                code: &row.code,
                name: &row.name,
                gender: row.gender.clone(),
                birthday: row.birthday,
                administrative_class_id: admin,
            },
        )
        .await?;
        Ok(Step::Applied)
    }

    async fn advisor_heading(&mut self, heading: &str, classes: &ClassNameMap) -> Result<Step, StepError> {
        let Some(assignment) = parse_advisor_info(heading) else {
            return Ok(Step::Ignored);
        };
        let class_name = classes.standardize(&assignment.class_name).ok_or_else(|| {
            RecordFault::unresolved(format!("no class name for cohort {}", assignment.class_name))
        })?;
        let key = NaturalKey::AdministrativeClass {
            name: class_name.to_string(),
        };
        if self.store.find_id(&key).await?.is_none() {
            return Err(RecordFault::unresolved(format!("{key} does not exist")).into());
        }
        let advisor = parse_professor_name(&assignment.advisor_name);
        let professor_id = resolver::resolve_professor(&mut self.store, &advisor, None).await?;
        if !self.store.set_advisor(class_name, professor_id).await? {
            return Err(RecordFault::unresolved(format!("{key} does not exist")).into());
        }
        Ok(Step::Applied)
    }

    async fn begin(&mut self) -> Result<(), IngestError> {
        self.store.begin().await?;
        Ok(())
    }

    async fn commit(&mut self, run: &mut Run) -> Result<(), IngestError> {
        self.store.commit().await?;
        run.batches_committed += 1;
        Ok(())
    }

    /// Roll back the open batch and hand back the error that ended it.
    async fn abandon(&mut self, err: IngestError) -> IngestError {
        warn!(error = %err, "rolling back batch");
        if let Err(rollback) = self.store.rollback().await {
            warn!(error = %rollback, "rollback failed");
        }
        err
    }

    async fn open_record(&mut self) -> Result<(), IngestError> {
        if let Err(err) = self.store.savepoint().await {
            return Err(self.abandon(err.into()).await);
        }
        Ok(())
    }

    /// Count the record and close its savepoint; a skipped record leaves no rows behind.
    async fn settle(&mut self, outcome: Result<Step, StepError>, run: &mut Run) -> Result<(), IngestError> {
        let closed = match outcome {
            Ok(step) => {
                if let Step::Applied = step {
                    run.processed += 1;
                }
                self.store.release_savepoint().await
            }
            Err(StepError::Record(fault)) => {
                run.skipped += 1;
                debug!(%fault, "record skipped");
                self.store.rollback_to_savepoint().await
            }
            Err(StepError::Batch(err)) => return Err(self.abandon(err).await),
        };
        if let Err(err) = closed {
            return Err(self.abandon(err.into()).await);
        }
        Ok(())
    }
}

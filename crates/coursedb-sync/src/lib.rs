//! Reconciliation engine: entity resolution, relationship linking and the run
//! entry points that drive them against a [`Store`].

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use coursedb_adapters::{
    advisor_headings, catalog_table_rows, load_extracted_document, staff_table_rows, AdapterError,
    ClassNameMap,
};
use coursedb_core::EntityId;
use coursedb_storage::{FetchError, HttpFetcher, PgStore, Store, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub mod config;
pub mod linker;
pub mod pipeline;
pub mod resolver;

pub use config::{IngestConfig, SourceRegistry};
pub use linker::LinkPolicy;
pub use pipeline::{CrawlPlan, HttpPageSource, PageSource, ReconcilePipeline};
pub use resolver::ResolveError;

pub const CRATE_NAME: &str = "coursedb-sync";

/// Run-level failure; always surfaced to the caller.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported format tag: {0}")]
    UnsupportedFormat(String),
    #[error("fetch failed: {0}")]
    TransientFetchFailure(#[from] FetchError),
    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<AdapterError> for IngestError {
    fn from(value: AdapterError) -> Self {
        match value {
            AdapterError::UnsupportedFormat(tag) => IngestError::UnsupportedFormat(tag),
            other => IngestError::Config(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Catalog,
    Schedules,
    Enrollments,
    Professors,
    Students,
    Advisors,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunKind::Catalog => "catalog",
            RunKind::Schedules => "schedules",
            RunKind::Enrollments => "enrollments",
            RunKind::Professors => "professors",
            RunKind::Students => "students",
            RunKind::Advisors => "advisors",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub skipped: usize,
    pub batches_committed: usize,
}

async fn pipeline_from_config(config: &IngestConfig) -> Result<ReconcilePipeline<PgStore>> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    Ok(ReconcilePipeline::new(store).with_policy(config.link_policy()))
}

pub async fn migrate_from_env() -> Result<()> {
    let config = IngestConfig::from_env();
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    store.migrate().await.context("applying migrations")?;
    info!("migrations applied");
    Ok(())
}

/// Fetch and import every registered catalog, or only the one of `program_id`.
pub async fn run_catalog_from_env(program_id: Option<EntityId>) -> Result<Vec<RunSummary>> {
    let config = IngestConfig::from_env();
    let registry = config.load_registry()?;
    let fetcher = HttpFetcher::new(config.http_client_config())?;
    let mut pipeline = pipeline_from_config(&config).await?;

    let fetch_id = Uuid::new_v4();
    let mut summaries = Vec::new();
    for source in registry
        .catalogs
        .iter()
        .filter(|s| program_id.map_or(true, |id| id == s.program_id))
    {
        let html = fetcher.fetch_text(fetch_id, "catalog", &source.url).await?;
        let rows = catalog_table_rows(&html)?;
        let summary = pipeline
            .import_catalog(source.program_id, &rows)
            .await
            .with_context(|| format!("importing catalog of program {}", source.program_id))?;
        summaries.push(summary);
    }
    Ok(summaries)
}

pub async fn run_schedules_from_env(files: &[PathBuf]) -> Result<RunSummary> {
    let config = IngestConfig::from_env();
    let mut pipeline = pipeline_from_config(&config).await?;
    import_schedule_files(&mut pipeline, files).await
}

/// Crawl every registered term, or only `term_id`.
pub async fn run_enrollments_from_env(term_id: Option<&str>) -> Result<Vec<RunSummary>> {
    let config = IngestConfig::from_env();
    let registry = config.load_registry()?;
    let source = registry
        .enrollment
        .context("sources registry has no enrollment section")?;
    let fetcher = HttpFetcher::new(config.http_client_config())?;
    let mut pipeline = pipeline_from_config(&config).await?;

    let mut summaries = Vec::new();
    for (term, semester_id) in &source.terms {
        if term_id.is_some_and(|t| t != term.as_str()) {
            continue;
        }
        let pages = HttpPageSource::new(fetcher.clone(), source.clone(), term.clone());
        let plan = pages.plan();
        let summary = pipeline
            .crawl_enrollments(&pages, semester_id, plan)
            .await
            .with_context(|| format!("crawling term {term} ({semester_id})"))?;
        summaries.push(summary);
    }
    Ok(summaries)
}

pub async fn run_professors_from_env() -> Result<RunSummary> {
    let config = IngestConfig::from_env();
    let registry = config.load_registry()?;
    let url = registry
        .staff_url
        .context("sources registry has no staff_url")?;
    let fetcher = HttpFetcher::new(config.http_client_config())?;
    let html = fetcher.fetch_text(Uuid::new_v4(), "staff", &url).await?;
    let rows = staff_table_rows(&html)?;
    let mut pipeline = pipeline_from_config(&config).await?;
    Ok(pipeline.import_professors(&rows).await?)
}

pub async fn run_students_from_env(files: &[PathBuf]) -> Result<RunSummary> {
    let config = IngestConfig::from_env();
    let mut pages = Vec::new();
    for file in files {
        pages.extend(load_extracted_document(file)?.raw_pages());
    }
    let mut pipeline = pipeline_from_config(&config).await?;
    Ok(pipeline.import_students(&pages).await?)
}

/// Walk every cohort listing page by page until a page has no headings.
pub async fn run_advisors_from_env() -> Result<RunSummary> {
    let config = IngestConfig::from_env();
    let registry = config.load_registry()?;
    let source = registry
        .advisors
        .context("sources registry has no advisors section")?;
    let table = std::fs::read_to_string(&source.class_names)
        .with_context(|| format!("reading {}", source.class_names.display()))?;
    let classes = ClassNameMap::from_lines(table.lines());
    info!(classes = classes.len(), "class name table loaded");

    let fetcher = HttpFetcher::new(config.http_client_config())?;
    let fetch_id = Uuid::new_v4();
    let mut headings = Vec::new();
    for (cohort, url) in &source.listings {
        for page in 1..=source.max_pages {
            let separator = if url.contains('?') { '&' } else { '?' };
            let page_url = format!("{url}{separator}page={page}");
            let html = fetcher.fetch_text(fetch_id, cohort, &page_url).await?;
            let found = advisor_headings(&html)?;
            if found.is_empty() {
                break;
            }
            headings.extend(found);
        }
    }

    let mut pipeline = pipeline_from_config(&config).await?;
    Ok(pipeline.assign_advisors(&headings, &classes).await?)
}

/// Load extracted schedule documents and import them through `pipeline`.
pub async fn import_schedule_files<S: Store>(
    pipeline: &mut ReconcilePipeline<S>,
    files: &[PathBuf],
) -> Result<RunSummary> {
    let documents = files
        .iter()
        .map(load_extracted_document)
        .collect::<Result<Vec<_>>>()?;
    Ok(pipeline.import_schedules(&documents).await?)
}

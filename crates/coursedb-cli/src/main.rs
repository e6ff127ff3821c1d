use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use coursedb_core::EntityId;
use coursedb_storage::MemoryStore;
use coursedb_sync::{import_schedule_files, ReconcilePipeline, RunSummary};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "coursedb")]
#[command(about = "Reconcile course catalogs, schedules and rosters into the records database")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Import program catalogs listed in the sources registry.
    Catalog {
        #[arg(long)]
        program: Option<EntityId>,
    },
    /// Import extracted schedule documents.
    Schedules {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Reconcile into an in-memory store and report counts without touching the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Crawl the enrollment grid for every registered term, or one.
    Enrollments {
        #[arg(long)]
        term: Option<String>,
    },
    /// Import the staff roster.
    Professors,
    /// Import extracted student roster documents.
    Students {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Assign advisors from the cohort course listings.
    Advisors,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "coursedb=info",
        1 => "coursedb=debug",
        _ => "coursedb=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

fn print_summaries(summaries: &[RunSummary]) -> Result<()> {
    for summary in summaries {
        println!("{}", serde_json::to_string(summary)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);
    debug!(command = ?cli.command, "starting");

    match cli.command {
        Commands::Migrate => {
            coursedb_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Catalog { program } => {
            print_summaries(&coursedb_sync::run_catalog_from_env(program).await?)?;
        }
        Commands::Schedules { files, dry_run } => {
            let summary = if dry_run {
                let mut pipeline = ReconcilePipeline::new(MemoryStore::new());
                import_schedule_files(&mut pipeline, &files).await?
            } else {
                coursedb_sync::run_schedules_from_env(&files).await?
            };
            print_summaries(&[summary])?;
        }
        Commands::Enrollments { term } => {
            print_summaries(&coursedb_sync::run_enrollments_from_env(term.as_deref()).await?)?;
        }
        Commands::Professors => {
            print_summaries(&[coursedb_sync::run_professors_from_env().await?])?;
        }
        Commands::Students { files } => {
            print_summaries(&[coursedb_sync::run_students_from_env(&files).await?])?;
        }
        Commands::Advisors => {
            print_summaries(&[coursedb_sync::run_advisors_from_env().await?])?;
        }
    }

    Ok(())
}

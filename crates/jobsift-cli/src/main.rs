use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jobsift_storage::{JobStore, MemoryJobStore, PgJobStore};
use jobsift_sync::{parse_resume_arg, RunReport, SourceRegistry, SyncConfig, SyncPipeline};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobsift-cli")]
#[command(about = "Job listing ingestion: fetch, normalize and upsert vacancies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the selected sources once and write a run report.
    Sync(SyncArgs),
    /// Apply database migrations.
    Migrate,
    /// List the sources in the registry.
    Sources,
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Source id to run; repeatable. Defaults to every enabled source.
    #[arg(long = "source", value_name = "ID")]
    sources: Vec<String>,
    /// Restart a source mid-stream, as `source=cursor`.
    #[arg(long, value_name = "SOURCE=CURSOR")]
    resume: Vec<String>,
    /// Keep records in memory instead of Postgres.
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => sync(config, args).await,
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is not set")?;
            PgJobStore::connect(url).await?.migrate().await?;
            println!("migrations applied");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(&config.sources_path)?;
            for source in &registry.sources {
                println!(
                    "{:<10} {:<8} {:<7} {:<3} keywords  {}",
                    source.source_id,
                    if source.enabled { "enabled" } else { "disabled" },
                    format!("{:?}", source.mode).to_lowercase(),
                    source.keywords.len(),
                    source.display_name
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn sync(config: SyncConfig, args: SyncArgs) -> Result<ExitCode> {
    let resume = args
        .resume
        .iter()
        .map(|arg| parse_resume_arg(arg))
        .collect::<Result<BTreeMap<_, _>>>()?;

    let store: Arc<dyn JobStore> = if args.memory_store {
        Arc::new(MemoryJobStore::new())
    } else {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is not set (use --memory-store for a dry run)")?;
        Arc::new(PgJobStore::connect(url).await?)
    };

    let pipeline = SyncPipeline::new(config, store)?;
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let report = pipeline.run(&args.sources, &resume).await?;
    let run_dir = pipeline.write_report(&report).await?;
    print_summary(&report);
    println!("report: {}", run_dir.display());

    Ok(if report.any_aborted() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(report: &RunReport) {
    println!("run {}", report.run_id);
    for s in &report.sources {
        println!(
            "  {:<10} {:<9} pages={} fetched={} inserted={} unchanged={} updated={} rejected={} retries={}",
            s.source,
            s.status.to_string(),
            s.pages,
            s.fetched,
            s.inserted,
            s.duplicate_unchanged,
            s.updated,
            s.rejected,
            s.retries
        );
        for issue in &s.errors {
            println!("    {:?} at {:?}: {}", issue.kind, issue.cursor.as_ref().map(|c| c.as_str()), issue.message);
        }
        if let Some(cursor) = &s.resume_cursor {
            println!("    resume with --resume {}={}", s.source, cursor);
        }
    }
}

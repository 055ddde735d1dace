use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use jobsift_adapters::Cursor;
use jobsift_storage::{HttpFetcher, JobStore};
use tracing::info;
use uuid::Uuid;

pub mod config;
pub mod orchestrator;
pub mod report;

pub use config::{SourceConfig, SourceMode, SourceRegistry, SyncConfig};
pub use orchestrator::{Orchestrator, SourceJob, SyncError};
pub use report::{write_run_report, AdapterIssue, IssueKind, RunReport, RunStatus, SourceRunReport};

pub const CRATE_NAME: &str = "jobsift-sync";

/// Parses `source=cursor` as given on the command line.
pub fn parse_resume_arg(arg: &str) -> Result<(String, Cursor)> {
    let (source, cursor) = arg
        .split_once('=')
        .with_context(|| format!("resume {arg:?} is not of the form source=cursor"))?;
    if source.trim().is_empty() || cursor.trim().is_empty() {
        bail!("resume {arg:?} has an empty source or cursor");
    }
    Ok((source.trim().to_string(), Cursor::new(cursor.trim())))
}

pub struct SyncPipeline {
    config: SyncConfig,
    registry: SourceRegistry,
    http: Arc<HttpFetcher>,
    orchestrator: Orchestrator,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path)?;
        Self::with_registry(config, registry, store)
    }

    pub fn with_registry(
        config: SyncConfig,
        registry: SourceRegistry,
        store: Arc<dyn JobStore>,
    ) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let orchestrator = Orchestrator::new(store, config.backoff()).with_max_pages(config.max_pages);
        Ok(Self {
            config,
            registry,
            http,
            orchestrator,
        })
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.orchestrator.cancel_flag()
    }

    /// Runs the selected sources concurrently. Only a store failure is an `Err`;
    /// aborted sources are reported in the returned `RunReport`.
    pub async fn run(
        &self,
        selected: &[String],
        resume: &BTreeMap<String, Cursor>,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let sources = self.registry.select(selected)?;
        if let Some(unknown) = resume
            .keys()
            .find(|id| !sources.iter().any(|s| &s.source_id == *id))
        {
            bail!("resume cursor given for {unknown}, which is not part of this run");
        }

        let jobs = sources
            .iter()
            .map(|source| {
                Ok(SourceJob {
                    adapter: self.registry.build_adapter(source, &self.http)?,
                    resume: resume.get(&source.source_id).cloned(),
                    max_pages: source.max_pages,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(%run_id, sources = jobs.len(), "starting sync run");
        let reports = self.orchestrator.run_all(run_id, jobs).await?;
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sources: reports,
        };
        let totals = report.totals();
        info!(
            %run_id,
            inserted = totals["inserted"],
            updated = totals["updated"],
            unchanged = totals["duplicate_unchanged"],
            rejected = totals["rejected"],
            aborted = report.any_aborted(),
            "sync run finished"
        );
        Ok(report)
    }

    pub async fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        write_run_report(&self.config.reports_dir, report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsift_storage::MemoryJobStore;
    use std::path::Path;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    fn pipeline(store: Arc<MemoryJobStore>, reports_dir: PathBuf) -> SyncPipeline {
        let config = SyncConfig {
            sources_path: workspace_root().join("fixtures/offline.yaml"),
            reports_dir,
            ..SyncConfig::from_lookup(|_| None)
        };
        SyncPipeline::new(config, store).unwrap()
    }

    #[test]
    fn resume_args_split_on_equals() {
        let (source, cursor) = parse_resume_arg("hh=k1:p3").unwrap();
        assert_eq!(source, "hh");
        assert_eq!(cursor.as_str(), "k1:p3");
        assert!(parse_resume_arg("hh").is_err());
        assert!(parse_resume_arg("=k0:p1").is_err());
    }

    #[tokio::test]
    async fn replayed_run_is_idempotent_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let pipeline = pipeline(Arc::clone(&store), dir.path().to_path_buf());

        let first = pipeline.run(&[], &BTreeMap::new()).await.unwrap();
        let remotive = &first.sources[0];
        assert_eq!(remotive.status, RunStatus::Completed);
        assert_eq!(remotive.pages, 2);
        assert_eq!(remotive.skipped_pages, 1);
        assert_eq!(remotive.inserted, 3);
        assert_eq!(remotive.errors[0].kind, IssueKind::Parse);
        assert_eq!(store.len().await, 3);

        let second = pipeline.run(&["all".to_string()], &BTreeMap::new()).await.unwrap();
        assert_eq!(second.sources[0].inserted, 0);
        assert_eq!(second.sources[0].duplicate_unchanged, 3);

        let run_dir = pipeline.write_report(&second).await.unwrap();
        assert!(run_dir.join("run_report.json").exists());
    }

    #[tokio::test]
    async fn resume_for_unselected_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Arc::new(MemoryJobStore::new()), dir.path().to_path_buf());
        let resume = BTreeMap::from([("hh".to_string(), Cursor::new("k0:p1"))]);
        assert!(pipeline.run(&[], &resume).await.is_err());
    }
}

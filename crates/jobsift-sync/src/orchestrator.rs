//! Drives adapters page by page into the store and tallies the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jobsift_adapters::{AdapterContext, AdapterError, Cursor, Page, SourceAdapter};
use jobsift_core::{normalize, SourceProfile};
use jobsift_storage::{BackoffPolicy, JobStore, StoreError};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::report::{IssueKind, RunStatus, SourceRunReport};

pub const DEFAULT_MAX_PAGES: usize = 50;

/// Failures that end the whole invocation rather than one source's run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("source task failed: {0}")]
    Task(String),
}

/// One source's share of a multi-source run.
pub struct SourceJob {
    pub adapter: Arc<dyn SourceAdapter>,
    pub resume: Option<Cursor>,
    pub max_pages: Option<usize>,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    backoff: BackoffPolicy,
    max_pages: usize,
    cancel: Arc<AtomicBool>,
    // set by `run_all` when one source hits a store failure; scoped to that call
    abort: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            backoff,
            max_pages: DEFAULT_MAX_PAGES,
            cancel: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting the flag stops every run at its next page boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn stop_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.abort.load(Ordering::Relaxed)
    }

    pub async fn run_source(
        &self,
        run_id: Uuid,
        adapter: &dyn SourceAdapter,
        resume: Option<Cursor>,
    ) -> Result<SourceRunReport, SyncError> {
        self.run_source_capped(run_id, adapter, resume, self.max_pages)
            .await
    }

    async fn run_source_capped(
        &self,
        run_id: Uuid,
        adapter: &dyn SourceAdapter,
        resume: Option<Cursor>,
        max_pages: usize,
    ) -> Result<SourceRunReport, SyncError> {
        let span = info_span!("sync_source", %run_id, source = adapter.source_id());
        self.drive(run_id, adapter, resume, max_pages)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        run_id: Uuid,
        adapter: &dyn SourceAdapter,
        resume: Option<Cursor>,
        max_pages: usize,
    ) -> Result<SourceRunReport, SyncError> {
        let profile = adapter.profile();
        let ctx = AdapterContext { run_id };
        let mut report = SourceRunReport::new(adapter.source_id(), run_id);
        let mut cursor = resume;
        let mut attempted_pages = 0usize;

        loop {
            if self.stop_requested() {
                info!(cursor = ?cursor, "cancelled at page boundary");
                report.finish(RunStatus::Cancelled, cursor);
                return Ok(report);
            }
            if attempted_pages >= max_pages {
                warn!(max_pages, cursor = ?cursor, "page cap reached");
                report.finish(RunStatus::Completed, cursor);
                return Ok(report);
            }
            attempted_pages += 1;

            let fetched = self
                .fetch_with_retry(&ctx, adapter, cursor.as_ref(), &mut report)
                .await;
            let page = match fetched {
                Ok(page) => page,
                Err(AdapterError::Parse { message, skip_to }) => {
                    warn!(cursor = ?cursor, error = %message, "skipping unreadable page");
                    report.skipped_pages += 1;
                    report.record_issue(IssueKind::Parse, cursor.as_ref(), message);
                    if skip_to.is_none() {
                        report.finish(RunStatus::Completed, None);
                        return Ok(report);
                    }
                    cursor = skip_to;
                    continue;
                }
                Err(err) => {
                    warn!(cursor = ?cursor, error = %err, retries = report.retries, "source aborted");
                    report.record_issue(IssueKind::Fetch, cursor.as_ref(), err.to_string());
                    report.finish(RunStatus::Aborted, cursor);
                    return Ok(report);
                }
            };

            self.ingest_page(&page, &profile, cursor.as_ref(), &mut report)
                .await?;
            debug!(cursor = ?cursor, records = page.records.len(), "page ingested");

            match page.next {
                Some(next) => cursor = Some(next),
                None => {
                    info!(
                        pages = report.pages,
                        inserted = report.inserted,
                        updated = report.updated,
                        unchanged = report.duplicate_unchanged,
                        rejected = report.rejected,
                        "source completed"
                    );
                    report.finish(RunStatus::Completed, None);
                    return Ok(report);
                }
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        ctx: &AdapterContext,
        adapter: &dyn SourceAdapter,
        cursor: Option<&Cursor>,
        report: &mut SourceRunReport,
    ) -> Result<Page, AdapterError> {
        let mut attempt = 0usize;
        loop {
            match adapter.fetch_page(ctx, cursor).await {
                Err(AdapterError::Fetch {
                    message,
                    retryable: true,
                }) if attempt < self.backoff.max_retries => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    attempt += 1;
                    report.retries += 1;
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "retrying page fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Upserts one page's records. A store failure is returned as-is and ends the invocation.
    async fn ingest_page(
        &self,
        page: &Page,
        profile: &SourceProfile,
        cursor: Option<&Cursor>,
        report: &mut SourceRunReport,
    ) -> Result<(), SyncError> {
        report.pages += 1;
        report.fetched += page.records.len();
        for issue in &page.skipped {
            report.record_issue(IssueKind::Record, cursor, issue.clone());
        }
        for raw in &page.records {
            match normalize(raw, profile) {
                Ok(job) => {
                    report.normalized += 1;
                    let outcome = self.store.upsert(&job).await?;
                    report.record_outcome(outcome);
                }
                Err(reason) => {
                    debug!(reason = reason.code(), "record rejected");
                    report.record_rejection(&reason, raw.hint());
                }
            }
        }
        Ok(())
    }

    /// Runs every job concurrently. A store failure in any source stops the
    /// others at their next page boundary and is returned once all have stopped.
    /// The caller's cancel flag is left untouched.
    pub async fn run_all(
        &self,
        run_id: Uuid,
        jobs: Vec<SourceJob>,
    ) -> Result<Vec<SourceRunReport>, SyncError> {
        let scoped = Self {
            abort: Arc::new(AtomicBool::new(false)),
            ..self.clone()
        };
        let mut tasks = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let this = scoped.clone();
            let max_pages = job.max_pages.unwrap_or(self.max_pages);
            tasks.spawn(async move {
                let result = this
                    .run_source_capped(run_id, job.adapter.as_ref(), job.resume, max_pages)
                    .await;
                (index, result)
            });
        }

        let mut reports = Vec::new();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok((index, Ok(report))) => {
                    reports.push((index, report));
                    continue;
                }
                Ok((_, Err(err))) => err,
                Err(join_err) => SyncError::Task(join_err.to_string()),
            };
            error!(error = %err, "source run failed, stopping the rest");
            scoped.abort.store(true, Ordering::Relaxed);
            failure.get_or_insert(err);
        }
        if let Some(err) = failure {
            return Err(err);
        }

        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }
}

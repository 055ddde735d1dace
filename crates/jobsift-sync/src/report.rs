use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobsift_adapters::Cursor;
use jobsift_core::RejectionReason;
use jobsift_storage::UpsertOutcome;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

const MAX_REJECTION_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The adapter reported end of stream, or the page cap was reached.
    Completed,
    Cancelled,
    /// Retries for a page ran out; earlier pages stay stored.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Fetch,
    Parse,
    Record,
}

/// An adapter-level problem, kept in the report instead of ending the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterIssue {
    pub kind: IssueKind,
    pub cursor: Option<Cursor>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionSample {
    pub reason: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRunReport {
    pub source: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub pages: usize,
    pub skipped_pages: usize,
    pub fetched: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub duplicate_unchanged: usize,
    pub updated: usize,
    pub retries: usize,
    pub rejections: BTreeMap<String, usize>,
    pub rejection_samples: Vec<RejectionSample>,
    pub errors: Vec<AdapterIssue>,
    /// First page not yet completed. On a completed run `None` means the stream
    /// was exhausted; otherwise it means the run never got past the first page.
    pub resume_cursor: Option<Cursor>,
}

impl SourceRunReport {
    pub fn new(source: impl Into<String>, run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            run_id,
            started_at: now,
            finished_at: now,
            status: RunStatus::Completed,
            pages: 0,
            skipped_pages: 0,
            fetched: 0,
            normalized: 0,
            rejected: 0,
            inserted: 0,
            duplicate_unchanged: 0,
            updated: 0,
            retries: 0,
            rejections: BTreeMap::new(),
            rejection_samples: Vec::new(),
            errors: Vec::new(),
            resume_cursor: None,
        }
    }

    pub fn record_outcome(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::DuplicateUnchanged => self.duplicate_unchanged += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn record_rejection(&mut self, reason: &RejectionReason, hint: impl Into<String>) {
        self.rejected += 1;
        *self.rejections.entry(reason.code().to_string()).or_default() += 1;
        if self.rejection_samples.len() < MAX_REJECTION_SAMPLES {
            self.rejection_samples.push(RejectionSample {
                reason: reason.to_string(),
                hint: hint.into(),
            });
        }
    }

    pub fn record_issue(&mut self, kind: IssueKind, cursor: Option<&Cursor>, message: impl Into<String>) {
        self.errors.push(AdapterIssue {
            kind,
            cursor: cursor.cloned(),
            message: message.into(),
        });
    }

    pub fn finish(&mut self, status: RunStatus, resume_cursor: Option<Cursor>) {
        self.status = status;
        self.resume_cursor = resume_cursor;
        self.finished_at = Utc::now();
    }

    pub fn stored(&self) -> usize {
        self.inserted + self.duplicate_unchanged + self.updated
    }
}

/// One invocation across every selected source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceRunReport>,
}

impl RunReport {
    pub fn any_aborted(&self) -> bool {
        self.sources.iter().any(|s| s.status == RunStatus::Aborted)
    }

    pub fn totals(&self) -> BTreeMap<&'static str, usize> {
        let mut totals = BTreeMap::from([
            ("fetched", 0),
            ("normalized", 0),
            ("rejected", 0),
            ("inserted", 0),
            ("duplicate_unchanged", 0),
            ("updated", 0),
        ]);
        for s in &self.sources {
            for (key, value) in [
                ("fetched", s.fetched),
                ("normalized", s.normalized),
                ("rejected", s.rejected),
                ("inserted", s.inserted),
                ("duplicate_unchanged", s.duplicate_unchanged),
                ("updated", s.updated),
            ] {
                *totals.entry(key).or_default() += value;
            }
        }
        totals
    }

    pub fn summary_markdown(&self) -> String {
        let rows = self
            .sources
            .iter()
            .map(|s| {
                format!(
                    "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                    s.source,
                    s.status,
                    s.pages,
                    s.fetched,
                    s.inserted,
                    s.duplicate_unchanged,
                    s.updated,
                    s.rejected,
                    s.resume_cursor.as_ref().map(Cursor::as_str).unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "# jobsift run {}\n\n- Started: {}\n- Finished: {}\n\n| source | status | pages | fetched | inserted | unchanged | updated | rejected | resume |\n|---|---|---|---|---|---|---|---|---|\n{}\n",
            self.run_id, self.started_at, self.finished_at, rows
        )
    }
}

/// Writes `<reports_dir>/<run_id>/run_report.json` and `summary.md`; returns the run directory.
pub async fn write_run_report(reports_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let run_dir = reports_dir.join(report.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    fs::write(run_dir.join("run_report.json"), json)
        .await
        .context("writing run_report.json")?;
    fs::write(run_dir.join("summary.md"), report.summary_markdown())
        .await
        .context("writing summary.md")?;
    Ok(run_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        let run_id = Uuid::new_v4();
        let mut hh = SourceRunReport::new("hh", run_id);
        hh.fetched = 3;
        hh.normalized = 2;
        hh.record_outcome(UpsertOutcome::Inserted);
        hh.record_outcome(UpsertOutcome::DuplicateUnchanged);
        hh.record_rejection(&RejectionReason::MissingPostedDate, "Data Analyst");
        hh.finish(RunStatus::Aborted, Some(Cursor::new("k0:p2")));

        let mut remotive = SourceRunReport::new("remotive", run_id);
        remotive.fetched = 4;
        remotive.normalized = 4;
        for _ in 0..4 {
            remotive.record_outcome(UpsertOutcome::Updated);
        }
        remotive.finish(RunStatus::Completed, None);

        RunReport {
            run_id,
            started_at: hh.started_at,
            finished_at: remotive.finished_at,
            sources: vec![hh, remotive],
        }
    }

    #[test]
    fn tallies_and_totals() {
        let report = report();
        assert!(report.any_aborted());
        let hh = &report.sources[0];
        assert_eq!(hh.stored(), 2);
        assert_eq!(hh.rejections.get("missing_posted_date"), Some(&1));
        assert_eq!(hh.rejection_samples[0].hint, "Data Analyst");

        let totals = report.totals();
        assert_eq!(totals["fetched"], 7);
        assert_eq!(totals["updated"], 4);
        assert_eq!(totals["rejected"], 1);
    }

    #[test]
    fn rejection_samples_are_capped() {
        let mut source = SourceRunReport::new("hitmarker", Uuid::new_v4());
        for i in 0..(MAX_REJECTION_SAMPLES + 5) {
            source.record_rejection(&RejectionReason::MissingTitle, format!("card {i}"));
        }
        assert_eq!(source.rejected, MAX_REJECTION_SAMPLES + 5);
        assert_eq!(source.rejection_samples.len(), MAX_REJECTION_SAMPLES);
    }

    #[tokio::test]
    async fn writes_json_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();
        let run_dir = write_run_report(dir.path(), &report).await.unwrap();
        assert_eq!(run_dir, dir.path().join(report.run_id.to_string()));

        let json = std::fs::read_to_string(run_dir.join("run_report.json")).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
        assert!(json.contains("\"status\": \"aborted\""));

        let summary = std::fs::read_to_string(run_dir.join("summary.md")).unwrap();
        assert!(summary.contains("| hh | aborted |"));
        assert!(summary.contains("k0:p2"));
    }
}

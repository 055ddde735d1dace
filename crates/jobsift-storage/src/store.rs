//! Upsert store keyed by identity.
//!
//! Both implementations let the key's uniqueness decide races: the Postgres
//! primary key for [`PgJobStore`], the map entry under one lock for
//! [`MemoryJobStore`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use jobsift_core::{IdentityKey, JobRecord, SalaryPeriod};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpsertOutcome {
    Inserted,
    DuplicateUnchanged,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::DuplicateUnchanged => "duplicate_unchanged",
            Self::Updated => "updated",
        }
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that end the whole invocation; none of these are retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("identity key {identity_key} conflict: {detail}")]
    Conflict {
        identity_key: IdentityKey,
        detail: String,
    },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome, StoreError>;
}

fn foreign_source(record: &JobRecord, owner: &str) -> StoreError {
    StoreError::Conflict {
        identity_key: record.identity_key.clone(),
        detail: format!(
            "key owned by source {owner:?}, refusing write from {:?}",
            record.source
        ),
    }
}

/// In-process store for tests and `--memory-store` runs.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    rows: Mutex<HashMap<IdentityKey, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub async fn get(&self, key: &IdentityKey) -> Option<JobRecord> {
        self.rows.lock().await.get(key).cloned()
    }

    /// All rows ordered by identity key.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let mut rows = self.rows.lock().await.values().cloned().collect::<Vec<_>>();
        rows.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));
        rows
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome, StoreError> {
        let mut rows = self.rows.lock().await;
        let existing = match rows.entry(record.identity_key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                return Ok(UpsertOutcome::Inserted);
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };
        if existing.source != record.source {
            return Err(foreign_source(record, &existing.source));
        }
        if existing.refreshable_fields_match(record) {
            return Ok(UpsertOutcome::DuplicateUnchanged);
        }
        existing.refresh_from(record);
        Ok(UpsertOutcome::Updated)
    }
}

/// Postgres-backed store over the `job_records` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying job_records migrations")?;
        info!("migrations applied");
        Ok(())
    }
}

struct SalaryColumns {
    low: Option<f64>,
    high: Option<f64>,
    currency: Option<String>,
    period: Option<&'static str>,
}

impl SalaryColumns {
    fn of(record: &JobRecord) -> Self {
        let range = record.salary.as_ref();
        Self {
            low: range.and_then(|r| r.low),
            high: range.and_then(|r| r.high),
            currency: range.and_then(|r| r.currency.clone()),
            period: range.and_then(|r| r.period).map(SalaryPeriod::as_str),
        }
    }
}

const INSERT_SQL: &str = r#"
INSERT INTO job_records (
    identity_key, source, external_id, title, subtitle, company, location,
    location_detail, skills, salary_text, salary_low, salary_high,
    salary_currency, salary_period, education, job_type, url, description,
    posted_date
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
ON CONFLICT (identity_key) DO NOTHING
RETURNING identity_key
"#;

// Only touches the row when a refreshable column actually differs, so an
// unchanged re-scrape is a zero-row update.
const REFRESH_SQL: &str = r#"
UPDATE job_records SET
    description = $3,
    skills = $4,
    salary_text = $5,
    salary_low = $6,
    salary_high = $7,
    salary_currency = $8,
    salary_period = $9,
    url = $10,
    updated_at = now()
WHERE identity_key = $1
  AND source = $2
  AND (
       description IS DISTINCT FROM $3
    OR skills IS DISTINCT FROM $4
    OR salary_text IS DISTINCT FROM $5
    OR salary_low IS DISTINCT FROM $6
    OR salary_high IS DISTINCT FROM $7
    OR salary_currency IS DISTINCT FROM $8
    OR salary_period IS DISTINCT FROM $9
    OR url IS DISTINCT FROM $10
  )
RETURNING identity_key
"#;

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome, StoreError> {
        let salary = SalaryColumns::of(record);
        let skills = record.skills.iter().cloned().collect::<Vec<_>>();

        let inserted: Option<String> = sqlx::query_scalar(INSERT_SQL)
            .bind(record.identity_key.as_str())
            .bind(&record.source)
            .bind(&record.external_id)
            .bind(&record.title)
            .bind(&record.subtitle)
            .bind(&record.company)
            .bind(&record.location)
            .bind(&record.location_detail)
            .bind(&skills)
            .bind(&record.salary_text)
            .bind(salary.low)
            .bind(salary.high)
            .bind(&salary.currency)
            .bind(salary.period)
            .bind(&record.education)
            .bind(&record.job_type)
            .bind(&record.url)
            .bind(&record.description)
            .bind(record.posted_date)
            .fetch_optional(&self.pool)
            .await?;
        if inserted.is_some() {
            return Ok(UpsertOutcome::Inserted);
        }

        let refreshed: Option<String> = sqlx::query_scalar(REFRESH_SQL)
            .bind(record.identity_key.as_str())
            .bind(&record.source)
            .bind(&record.description)
            .bind(&skills)
            .bind(&record.salary_text)
            .bind(salary.low)
            .bind(salary.high)
            .bind(&salary.currency)
            .bind(salary.period)
            .bind(&record.url)
            .fetch_optional(&self.pool)
            .await?;
        if refreshed.is_some() {
            debug!(identity_key = %record.identity_key, "refreshed stored record");
            return Ok(UpsertOutcome::Updated);
        }

        let owner: Option<String> =
            sqlx::query_scalar("SELECT source FROM job_records WHERE identity_key = $1")
                .bind(record.identity_key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match owner {
            Some(owner) if owner == record.source => Ok(UpsertOutcome::DuplicateUnchanged),
            Some(owner) => Err(foreign_source(record, &owner)),
            None => Err(StoreError::Conflict {
                identity_key: record.identity_key.clone(),
                detail: "row vanished between insert conflict and refresh".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use jobsift_core::SalaryRange;

    use super::*;

    fn record(source: &str, key: &str) -> JobRecord {
        JobRecord {
            source: source.to_string(),
            external_id: Some("123456".to_string()),
            title: "Backend Engineer".to_string(),
            subtitle: None,
            company: Some("Acme".to_string()),
            location: Some("Tashkent".to_string()),
            location_detail: None,
            skills: BTreeSet::from(["python".to_string(), "sql".to_string()]),
            salary_text: Some("$3,000 - $4,000 per month".to_string()),
            salary: Some(SalaryRange {
                low: Some(3000.0),
                high: Some(4000.0),
                currency: Some("USD".to_string()),
                period: Some(SalaryPeriod::Month),
            }),
            education: None,
            job_type: Some("Full-time".to_string()),
            url: "https://hh.uz/vacancy/123456".to_string(),
            description: Some("Build ingestion services.".to_string()),
            posted_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            identity_key: IdentityKey::from_hex(key),
        }
    }

    #[tokio::test]
    async fn upserting_twice_is_idempotent() {
        let store = MemoryJobStore::new();
        let job = record("hh", "k1");
        assert_eq!(store.upsert(&job).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            store.upsert(&job).await.unwrap(),
            UpsertOutcome::DuplicateUnchanged
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn changed_description_updates_in_place() {
        let store = MemoryJobStore::new();
        let job = record("hh", "k1");
        store.upsert(&job).await.unwrap();

        let mut fresh = job.clone();
        fresh.description = Some("Build ingestion services in Rust.".to_string());
        fresh.title = "Senior Backend Engineer".to_string();
        assert_eq!(store.upsert(&fresh).await.unwrap(), UpsertOutcome::Updated);

        let stored = store.get(&job.identity_key).await.unwrap();
        assert_eq!(stored.identity_key, job.identity_key);
        assert_eq!(stored.source, "hh");
        assert_eq!(stored.description, fresh.description);
        assert_eq!(stored.title, "Backend Engineer");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn non_refreshable_differences_are_duplicates() {
        let store = MemoryJobStore::new();
        let job = record("hh", "k1");
        store.upsert(&job).await.unwrap();
        let mut cosmetic = job.clone();
        cosmetic.subtitle = Some("python".to_string());
        assert_eq!(
            store.upsert(&cosmetic).await.unwrap(),
            UpsertOutcome::DuplicateUnchanged
        );
    }

    #[tokio::test]
    async fn foreign_source_on_same_key_is_a_conflict() {
        let store = MemoryJobStore::new();
        store.upsert(&record("hh", "k1")).await.unwrap();
        let err = store.upsert(&record("remotive", "k1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn racing_writers_insert_exactly_once() {
        let store = Arc::new(MemoryJobStore::new());
        let job = record("hh", "k1");
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let job = job.clone();
            handles.push(tokio::spawn(async move { store.upsert(&job).await.unwrap() }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        let inserted = outcomes
            .iter()
            .filter(|o| **o == UpsertOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, UpsertOutcome::Inserted | UpsertOutcome::DuplicateUnchanged)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn postgres_store_round_trip_when_configured() {
        let Ok(url) = std::env::var("JOBSIFT_TEST_DATABASE_URL") else {
            eprintln!("JOBSIFT_TEST_DATABASE_URL unset; skipping postgres store test");
            return;
        };
        let store = PgJobStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();

        let key = format!("test-{}", uuid::Uuid::new_v4());
        let job = record("hh", &key);
        assert_eq!(store.upsert(&job).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            store.upsert(&job).await.unwrap(),
            UpsertOutcome::DuplicateUnchanged
        );

        let mut fresh = job.clone();
        fresh.skills.insert("rust".to_string());
        assert_eq!(store.upsert(&fresh).await.unwrap(), UpsertOutcome::Updated);
        let err = store.upsert(&record("remotive", &key)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM job_records WHERE identity_key = $1")
                .bind(&key)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);

        sqlx::query("DELETE FROM job_records WHERE identity_key = $1")
            .bind(&key)
            .execute(store.pool())
            .await
            .unwrap();
    }
}

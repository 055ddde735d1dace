//! Canonical vacancy model shared by every ingestion layer.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod identity;
pub mod normalize;

pub use identity::{resolve, IdentityInput};
pub use normalize::{normalize, DateVocabulary};

pub const CRATE_NAME: &str = "jobsift-core";

/// Site-specific field mapping produced by one adapter, in extraction order.
///
/// Keys are whatever the adapter's site calls them; the [`SourceProfile`] field map
/// tells the normalizer which keys feed which canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(source_id: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            fetched_at,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key`, replacing an earlier value in place so extraction order is kept.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Short human pointer used when a record is rejected.
    pub fn hint(&self) -> String {
        ["url", "job_url", "title", "external_id"]
            .iter()
            .find_map(|k| self.get(k).filter(|v| !v.trim().is_empty()))
            .map(|v| v.trim().chars().take(120).collect())
            .unwrap_or_else(|| format!("<{} fields>", self.fields.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryPeriod {
    Hour,
    Month,
    Year,
}

impl SalaryPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hour" => Some(Self::Hour),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

/// Best-effort numeric reading of a free-text salary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SalaryRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub currency: Option<String>,
    pub period: Option<SalaryPeriod>,
}

/// Deterministic fingerprint of one real-world vacancy (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// `hash(source, external_id)`; the site exposes a stable id.
    NativeId,
    /// `hash(source, title, company, location)`; the site re-issues ids.
    ContentHash,
}

/// Canonical record every source is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub source: String,
    pub external_id: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub location_detail: Option<String>,
    pub skills: BTreeSet<String>,
    pub salary_text: Option<String>,
    pub salary: Option<SalaryRange>,
    pub education: Option<String>,
    pub job_type: Option<String>,
    pub url: String,
    pub description: Option<String>,
    pub posted_date: NaiveDate,
    pub identity_key: IdentityKey,
}

impl JobRecord {
    /// Compares the fields a re-scrape is allowed to refresh.
    pub fn refreshable_fields_match(&self, other: &JobRecord) -> bool {
        self.description == other.description
            && self.skills == other.skills
            && self.salary_text == other.salary_text
            && self.salary == other.salary
            && self.url == other.url
    }

    /// Copies refreshable fields from `fresh`; identity, source and external id stay put.
    pub fn refresh_from(&mut self, fresh: &JobRecord) {
        self.description = fresh.description.clone();
        self.skills = fresh.skills.clone();
        self.salary_text = fresh.salary_text.clone();
        self.salary = fresh.salary.clone();
        self.url = fresh.url.clone();
    }
}

/// Semantic reasons a raw record never becomes a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("record has no title")]
    MissingTitle,
    #[error("record has no job url")]
    MissingUrl,
    #[error("record has no posted date")]
    MissingPostedDate,
    #[error("posted date {raw:?} matches no accepted format")]
    UnparseableDate { raw: String },
    #[error("source uses native ids but record carries none")]
    MissingExternalId,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTitle => "missing_title",
            Self::MissingUrl => "missing_url",
            Self::MissingPostedDate => "missing_posted_date",
            Self::UnparseableDate { .. } => "unparseable_date",
            Self::MissingExternalId => "missing_external_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    ExternalId,
    Title,
    Subtitle,
    Company,
    Location,
    LocationDetail,
    Skills,
    Salary,
    Education,
    JobType,
    Url,
    Description,
    PostedDate,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 13] = [
        Self::ExternalId,
        Self::Title,
        Self::Subtitle,
        Self::Company,
        Self::Location,
        Self::LocationDetail,
        Self::Skills,
        Self::Salary,
        Self::Education,
        Self::JobType,
        Self::Url,
        Self::Description,
        Self::PostedDate,
    ];

    pub fn default_key(self) -> &'static str {
        match self {
            Self::ExternalId => "external_id",
            Self::Title => "title",
            Self::Subtitle => "subtitle",
            Self::Company => "company",
            Self::Location => "location",
            Self::LocationDetail => "location_detail",
            Self::Skills => "skills",
            Self::Salary => "salary",
            Self::Education => "education",
            Self::JobType => "job_type",
            Self::Url => "url",
            Self::Description => "description",
            Self::PostedDate => "posted_date",
        }
    }
}

/// Which raw keys feed each canonical field, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(CanonicalField, Vec<String>)>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            entries: CanonicalField::ALL
                .iter()
                .map(|f| (*f, vec![f.default_key().to_string()]))
                .collect(),
        }
    }
}

impl FieldMap {
    /// Prefers `raw_key` over the keys already mapped to `field`.
    pub fn alias(mut self, field: CanonicalField, raw_key: impl Into<String>) -> Self {
        let raw_key = raw_key.into();
        if let Some((_, keys)) = self.entries.iter_mut().find(|(f, _)| *f == field) {
            keys.retain(|k| *k != raw_key);
            keys.insert(0, raw_key);
        }
        self
    }

    pub fn keys(&self, field: CanonicalField) -> &[String] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, keys)| keys.as_slice())
            .unwrap_or(&[])
    }

    /// First non-blank value among the keys mapped to `field`.
    pub fn lookup<'a>(&self, raw: &'a RawRecord, field: CanonicalField) -> Option<&'a str> {
        self.keys(field)
            .iter()
            .filter_map(|k| raw.get(k))
            .find(|v| !v.trim().is_empty())
    }
}

pub const DEFAULT_SKILL_DELIMITERS: &[char] =
    &[',', ';', '\n', '\r', '|', '•', '·', '▪', '●', '◦'];

/// Per-source normalization quirks, fixed at adapter registration.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub source_id: String,
    pub identity: IdentityStrategy,
    pub fields: FieldMap,
    pub skill_delimiters: Vec<char>,
    pub dates: DateVocabulary,
    pub infer_job_type: bool,
}

impl SourceProfile {
    pub fn new(source_id: impl Into<String>, identity: IdentityStrategy) -> Self {
        Self {
            source_id: source_id.into(),
            identity,
            fields: FieldMap::default(),
            skill_delimiters: DEFAULT_SKILL_DELIMITERS.to_vec(),
            dates: DateVocabulary::english(),
            infer_job_type: false,
        }
    }

    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_extra_skill_delimiters(mut self, extra: &[char]) -> Self {
        for ch in extra {
            if !self.skill_delimiters.contains(ch) {
                self.skill_delimiters.push(*ch);
            }
        }
        self
    }

    pub fn with_dates(mut self, dates: DateVocabulary) -> Self {
        self.dates = dates;
        self
    }

    pub fn inferring_job_type(mut self) -> Self {
        self.infer_job_type = true;
        self
    }
}

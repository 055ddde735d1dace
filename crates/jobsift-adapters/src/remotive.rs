//! Remotive public JSON API, one request per search keyword.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{CanonicalField, FieldMap, IdentityStrategy, RawRecord, SourceProfile};
use jobsift_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    json_str, json_string_vec, json_text, keyword_at, AdapterContext, AdapterError, Cursor,
    KeywordPage, Page, SourceAdapter,
};

pub const SOURCE_ID: &str = "remotive";
pub const ENDPOINT: &str = "https://remotive.com/api/remote-jobs";

pub fn profile() -> SourceProfile {
    SourceProfile::new(SOURCE_ID, IdentityStrategy::NativeId).with_fields(
        FieldMap::default()
            .alias(CanonicalField::Company, "company_name")
            .alias(CanonicalField::Location, "candidate_required_location")
            .alias(CanonicalField::Subtitle, "category")
            .alias(CanonicalField::Skills, "tags")
            .alias(CanonicalField::PostedDate, "publication_date"),
    )
}

#[derive(Debug)]
pub struct RemotiveAdapter {
    http: Arc<HttpFetcher>,
    keywords: Vec<String>,
}

impl RemotiveAdapter {
    pub fn new(http: Arc<HttpFetcher>, keywords: Vec<String>) -> Self {
        Self { http, keywords }
    }

    fn search_url(keyword: Option<&str>) -> Result<String, AdapterError> {
        let Some(keyword) = keyword else {
            return Ok(ENDPOINT.to_string());
        };
        reqwest::Url::parse_with_params(ENDPOINT, &[("search", keyword)])
            .map(String::from)
            .map_err(|e| AdapterError::parse(format!("building search url: {e}"), None))
    }
}

#[async_trait]
impl SourceAdapter for RemotiveAdapter {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn profile(&self) -> SourceProfile {
        profile()
    }

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        cursor: Option<&Cursor>,
    ) -> Result<Page, AdapterError> {
        let at = KeywordPage::from_cursor(cursor)?;
        let keyword = keyword_at(&self.keywords, at.keyword)?;
        // the API returns every match at once, so each keyword is a single page
        let next = at.next_keyword(self.keywords.len()).map(KeywordPage::to_cursor);

        let url = Self::search_url(keyword)?;
        let response = self.http.fetch_bytes(ctx.run_id, SOURCE_ID, &url).await?;
        let fetched_at = Utc::now();

        let (records, skipped) = parse_listing(&response.text(), fetched_at)
            .map_err(|message| AdapterError::parse(message, next.clone()))?;
        debug!(?keyword, records = records.len(), "parsed remotive listing");
        Ok(Page {
            records,
            next,
            skipped,
        })
    }
}

/// Reads one API response into raw records plus descriptions of unreadable entries.
pub fn parse_listing(
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<(Vec<RawRecord>, Vec<String>), String> {
    let doc: JsonValue =
        serde_json::from_str(body).map_err(|e| format!("response is not json: {e}"))?;
    let jobs = doc
        .get("jobs")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| "response has no `jobs` array".to_string())?;

    let mut records = Vec::with_capacity(jobs.len());
    let mut skipped = Vec::new();
    for (index, job) in jobs.iter().enumerate() {
        if !job.is_object() {
            skipped.push(format!("jobs[{index}] is not an object"));
            continue;
        }
        let Some(id) = json_text(job, "id") else {
            skipped.push(format!("jobs[{index}] has no id"));
            continue;
        };

        let mut raw = RawRecord::new(SOURCE_ID, fetched_at).with("external_id", format!("remotive_{id}"));
        for key in [
            "title",
            "company_name",
            "category",
            "url",
            "salary",
            "description",
            "publication_date",
        ] {
            if let Some(value) = json_str(job, key) {
                raw.insert(key, value);
            }
        }
        raw.insert(
            "candidate_required_location",
            json_str(job, "candidate_required_location")
                .filter(|l| !l.trim().is_empty())
                .unwrap_or("Remote"),
        );
        if let Some(job_type) = json_str(job, "job_type") {
            raw.insert("job_type", humanize_job_type(job_type));
        }
        if let Some(tags) = json_string_vec(job, "tags") {
            raw.insert("tags", tags.join(", "));
        }
        records.push(raw);
    }
    Ok((records, skipped))
}

/// `full_time` -> `Full-time`.
fn humanize_job_type(value: &str) -> String {
    let spaced = value.trim().replace('_', "-");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

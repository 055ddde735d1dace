//! Source adapter contract, the closed adapter registry, and shared parsing helpers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jobsift_core::{RawRecord, SourceProfile};
use jobsift_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub mod fixture;
pub mod hh;
pub mod hitmarker;
pub mod remotive;

pub use fixture::FixtureAdapter;

pub const CRATE_NAME: &str = "jobsift-adapters";

/// Sources with a live adapter; the set is closed.
pub const LIVE_SOURCES: &[&str] = &[remotive::SOURCE_ID, hh::SOURCE_ID, hitmarker::SOURCE_ID];

/// Opaque pagination state handed back to the adapter that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fetched page: its records, the cursor of the page after it, and any
/// records the adapter could not read at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub next: Option<Cursor>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The page could not be retrieved.
    #[error("fetch failed: {message}")]
    Fetch { message: String, retryable: bool },
    /// The page was retrieved but its structure was not understood. Never retried.
    #[error("unexpected page structure: {message}")]
    Parse {
        message: String,
        skip_to: Option<Cursor>,
    },
    #[error("cursor {0:?} was not produced by this adapter")]
    InvalidCursor(String),
}

impl AdapterError {
    pub fn parse(message: impl Into<String>, skip_to: Option<Cursor>) -> Self {
        Self::Parse {
            message: message.into(),
            skip_to,
        }
    }
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        Self::Fetch {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    /// Normalization quirks for this source's records.
    fn profile(&self) -> SourceProfile;

    /// Fetches the page at `cursor`, or the first page when `None`.
    ///
    /// `Page::next == None` means end of stream. Calling again with a cursor
    /// returned earlier resumes at that page without revisiting earlier ones.
    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        cursor: Option<&Cursor>,
    ) -> Result<Page, AdapterError>;
}

/// Position in a keyword-by-page walk, rendered as `k<keyword>:p<page>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordPage {
    pub keyword: usize,
    pub page: u32,
}

impl KeywordPage {
    pub const START: Self = Self {
        keyword: 0,
        page: 0,
    };

    pub fn from_cursor(cursor: Option<&Cursor>) -> Result<Self, AdapterError> {
        let Some(cursor) = cursor else {
            return Ok(Self::START);
        };
        let invalid = || AdapterError::InvalidCursor(cursor.to_string());
        let (keyword, page) = cursor.as_str().split_once(':').ok_or_else(invalid)?;
        let keyword = keyword
            .strip_prefix('k')
            .and_then(|k| k.parse().ok())
            .ok_or_else(invalid)?;
        let page = page
            .strip_prefix('p')
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        Ok(Self { keyword, page })
    }

    pub fn to_cursor(self) -> Cursor {
        Cursor::new(format!("k{}:p{}", self.keyword, self.page))
    }

    /// Fails when the page counter would leave `u32`.
    pub fn next_page(self) -> Result<Self, AdapterError> {
        let page = self
            .page
            .checked_add(1)
            .ok_or_else(|| AdapterError::InvalidCursor(self.to_cursor().to_string()))?;
        Ok(Self { page, ..self })
    }

    /// First page of the following keyword, or `None` once all are walked.
    pub fn next_keyword(self, keyword_count: usize) -> Option<Self> {
        let keyword = self.keyword.checked_add(1)?;
        (keyword < keyword_count).then_some(Self { keyword, page: 0 })
    }
}

/// The search terms a keyword-driven source walks; empty means one unfiltered pass.
pub(crate) fn keyword_at(keywords: &[String], index: usize) -> Result<Option<&str>, AdapterError> {
    if keywords.is_empty() && index == 0 {
        return Ok(None);
    }
    keywords
        .get(index)
        .map(|k| Some(k.as_str()))
        .ok_or_else(|| AdapterError::InvalidCursor(format!("keyword index {index} out of range")))
}

pub fn profile_for_source(source_id: &str) -> Option<SourceProfile> {
    match source_id {
        remotive::SOURCE_ID => Some(remotive::profile()),
        hh::SOURCE_ID => Some(hh::profile()),
        hitmarker::SOURCE_ID => Some(hitmarker::profile()),
        _ => None,
    }
}

pub fn adapter_for_source(
    source_id: &str,
    keywords: Vec<String>,
    http: Arc<HttpFetcher>,
) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        remotive::SOURCE_ID => Some(Box::new(remotive::RemotiveAdapter::new(http, keywords))),
        hh::SOURCE_ID => Some(Box::new(hh::HhAdapter::new(http, keywords))),
        hitmarker::SOURCE_ID => Some(Box::new(hitmarker::HitmarkerAdapter::new(http, keywords))),
        _ => None,
    }
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::parse(format!("bad selector {css:?}: {e}"), None))
}

/// Text of the first match, with block children joined by newlines.
pub(crate) fn select_first_text(element: ElementRef<'_>, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<Vec<_>>().join("\n")))
}

pub(crate) fn select_all_texts(element: ElementRef<'_>, sel: &Selector) -> Vec<String> {
    element
        .select(sel)
        .filter_map(|n| text_or_none(n.text().collect::<String>()))
        .collect()
}

pub(crate) fn select_first_attr(element: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    element
        .select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(JsonValue::as_str)
}

/// Strings and numbers both read as text; sites disagree on id types.
pub(crate) fn json_text(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_string_vec(value: &JsonValue, key: &str) -> Option<Vec<String>> {
    let arr = value.get(key)?.as_array()?;
    Some(
        arr.iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
    )
}

/// Resolves a site-relative link against the site's origin.
pub(crate) fn absolute_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), href.trim_start_matches('/'))
    }
}

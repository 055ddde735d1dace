//! Offline replay of captured pages, standing in for a live adapter.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{RawRecord, SourceProfile};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::{AdapterContext, AdapterError, Cursor, KeywordPage, Page, SourceAdapter};

/// On-disk replay file: pages in stream order.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFile {
    pub fetched_at: DateTime<Utc>,
    pub pages: Vec<ReplayPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayPage {
    #[serde(default)]
    pub records: Vec<Map<String, JsonValue>>,
    /// Replays a page whose structure could not be read.
    #[serde(default)]
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    profile: SourceProfile,
    path: PathBuf,
    replay: ReplayFile,
}

impl FixtureAdapter {
    pub fn load(path: impl AsRef<Path>, profile: SourceProfile) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let replay: ReplayFile =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self {
            profile,
            path: path.to_path_buf(),
            replay,
        })
    }

    pub fn page_count(&self) -> usize {
        self.replay.pages.len()
    }

    fn raw_record(&self, fields: &Map<String, JsonValue>) -> RawRecord {
        let mut raw = RawRecord::new(self.profile.source_id.clone(), self.replay.fetched_at);
        for (key, value) in fields {
            let text = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Array(items) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                JsonValue::Null => continue,
                other => other.to_string(),
            };
            raw.insert(key.clone(), text);
        }
        raw
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source_id(&self) -> &str {
        &self.profile.source_id
    }

    fn profile(&self) -> SourceProfile {
        self.profile.clone()
    }

    async fn fetch_page(
        &self,
        _ctx: &AdapterContext,
        cursor: Option<&Cursor>,
    ) -> Result<Page, AdapterError> {
        let at = KeywordPage::from_cursor(cursor)?;
        let index = usize::try_from(at.page).unwrap_or(usize::MAX);
        let Some(page) = self.replay.pages.get(index).filter(|_| at.keyword == 0) else {
            return Err(AdapterError::InvalidCursor(at.to_cursor().to_string()));
        };
        let next = (index + 1 < self.replay.pages.len())
            .then(|| at.next_page())
            .transpose()?
            .map(KeywordPage::to_cursor);

        if let Some(message) = &page.parse_error {
            return Err(AdapterError::parse(message.clone(), next));
        }
        let records = page
            .records
            .iter()
            .map(|fields| self.raw_record(fields))
            .collect::<Vec<_>>();
        debug!(path = %self.path.display(), page = index, records = records.len(), "replayed fixture page");
        Ok(Page {
            records,
            next,
            skipped: Vec::new(),
        })
    }
}

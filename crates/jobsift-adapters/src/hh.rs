//! hh.uz vacancy search, scraped from the server-rendered result pages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{DateVocabulary, IdentityStrategy, RawRecord, SourceProfile};
use jobsift_storage::HttpFetcher;
use scraper::Html;
use tracing::debug;

use crate::{
    absolute_url, keyword_at, select_all_texts, select_first_attr, select_first_text, selector,
    AdapterContext, AdapterError, Cursor, KeywordPage, Page, SourceAdapter,
};

pub const SOURCE_ID: &str = "hh";
pub const BASE_URL: &str = "https://tashkent.hh.uz";

const MIN_VACANCY_ID_LEN: usize = 6;

pub fn profile() -> SourceProfile {
    SourceProfile::new(SOURCE_ID, IdentityStrategy::NativeId).with_dates(DateVocabulary::russian())
}

#[derive(Debug)]
pub struct HhAdapter {
    http: Arc<HttpFetcher>,
    keywords: Vec<String>,
}

impl HhAdapter {
    pub fn new(http: Arc<HttpFetcher>, keywords: Vec<String>) -> Self {
        Self { http, keywords }
    }

    fn search_url(keyword: Option<&str>, page: u32) -> Result<String, AdapterError> {
        let page = page.to_string();
        let mut params = vec![("page", page.as_str())];
        if let Some(keyword) = keyword {
            params.insert(0, ("text", keyword));
        }
        reqwest::Url::parse_with_params(&format!("{BASE_URL}/search/vacancy"), &params)
            .map(String::from)
            .map_err(|e| AdapterError::parse(format!("building search url: {e}"), None))
    }
}

#[async_trait]
impl SourceAdapter for HhAdapter {
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
        let next_keyword = at.next_keyword(self.keywords.len()).map(KeywordPage::to_cursor);

        let url = Self::search_url(keyword, at.page)?;
        let response = self.http.fetch_bytes(ctx.run_id, SOURCE_ID, &url).await?;
        let fetched_at = Utc::now();

        let listing = parse_search_page(&response.text(), keyword, fetched_at)
            .map_err(|message| AdapterError::parse(message, next_keyword.clone()))?;
        let next = if listing.has_next_page && !listing.records.is_empty() {
            Some(at.next_page()?.to_cursor())
        } else {
            next_keyword
        };
        debug!(?keyword, page = at.page, records = listing.records.len(), "parsed hh search page");
        Ok(Page {
            records: listing.records,
            next,
            skipped: listing.skipped,
        })
    }
}

#[derive(Debug, Default)]
pub struct SearchListing {
    pub records: Vec<RawRecord>,
    pub skipped: Vec<String>,
    pub has_next_page: bool,
}

/// Vacancy ids are the last path segment of the vacancy link, all digits.
pub fn vacancy_id(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let id = path.trim_end_matches('/').rsplit('/').next()?;
    (id.len() >= MIN_VACANCY_ID_LEN && id.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}

pub fn parse_search_page(
    html: &str,
    keyword: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Result<SearchListing, String> {
    let document = Html::parse_document(html);
    let sel = |css: &str| selector(css).map_err(|e| e.to_string());

    let results = sel(r#"[data-qa="vacancy-serp__results"]"#)?;
    let card_sel = sel(r#"[data-qa="vacancy-serp__vacancy"]"#)?;
    let title_link = sel(r#"a[data-qa="serp-item__title"]"#)?;
    let employer = sel(r#"[data-qa="vacancy-serp__vacancy-employer"]"#)?;
    let address = sel(r#"[data-qa="vacancy-serp__vacancy-address"]"#)?;
    let compensation = sel(r#"[data-qa="vacancy-serp__vacancy-compensation"]"#)?;
    let working_hours = sel(r#"[data-qa="vacancy-working-hours"]"#)?;
    let skills = sel(".vacancy-skill-list li")?;
    let snippet = sel(r#"[data-qa="vacancy-serp__vacancy_snippet_responsibility"]"#)?;
    let posted = sel(r#"[data-qa="vacancy-serp__vacancy-date"]"#)?;
    let pager_next = sel(r#"a[data-qa="pager-next"]"#)?;

    let Some(container) = document.select(&results).next() else {
        return Err("search results container not found".to_string());
    };

    let mut listing = SearchListing {
        has_next_page: document.select(&pager_next).next().is_some(),
        ..SearchListing::default()
    };
    for (index, card) in container.select(&card_sel).enumerate() {
        let Some(href) = select_first_attr(card, &title_link, "href") else {
            listing.skipped.push(format!("card {index}: no vacancy link"));
            continue;
        };
        let url = absolute_url(BASE_URL, &href);
        let Some(id) = vacancy_id(&url) else {
            listing.skipped.push(format!("card {index}: {url} carries no vacancy id"));
            continue;
        };
        let canonical_url = format!("{BASE_URL}/vacancy/{id}");

        let mut raw = RawRecord::new(SOURCE_ID, fetched_at)
            .with("external_id", id)
            .with("url", canonical_url);
        let fields = [
            ("title", &title_link),
            ("company", &employer),
            ("location", &address),
            ("salary", &compensation),
            ("job_type", &working_hours),
            ("description", &snippet),
            ("posted_date", &posted),
        ];
        for (key, sel) in fields {
            if let Some(value) = select_first_text(card, sel) {
                raw.insert(key, value);
            }
        }
        let card_skills = select_all_texts(card, &skills);
        if !card_skills.is_empty() {
            raw.insert("skills", card_skills.join("\n"));
        }
        if let Some(keyword) = keyword {
            raw.insert("subtitle", keyword);
        }
        listing.records.push(raw);
    }
    Ok(listing)
}

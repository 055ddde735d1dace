//! hitmarker.net job board. Listing ids are re-issued when a post is renewed,
//! so records are keyed by content rather than by the numeric slug suffix.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{CanonicalField, FieldMap, IdentityStrategy, RawRecord, SourceProfile};
use jobsift_storage::{FetchError, HttpFetcher};
use scraper::Html;
use tracing::{debug, warn};

use crate::{
    absolute_url, select_all_texts, select_first_attr, select_first_text, selector, text_or_none,
    AdapterContext, AdapterError, Cursor, KeywordPage, Page, SourceAdapter,
};

pub const SOURCE_ID: &str = "hitmarker";
pub const BASE_URL: &str = "https://hitmarker.net";
pub const DESCRIPTION_LIMIT: usize = 20_000;

const EMPLOYMENT_HINTS: &[&str] = &[
    "Full Time",
    "Part Time",
    "Contract",
    "Freelance",
    "Internship",
    "Temporary",
];
const SALARY_MARKERS: &[&str] = &["$", "£", "€", "per year", "per hour"];

pub fn profile() -> SourceProfile {
    SourceProfile::new(SOURCE_ID, IdentityStrategy::ContentHash)
        .with_fields(FieldMap::default().alias(CanonicalField::Education, "experience_level"))
        .with_extra_skill_delimiters(&['/'])
        .inferring_job_type()
}

/// Walks the unfiltered job list and keeps cards whose title or description
/// mentions one of `keywords`; an empty list keeps everything.
#[derive(Debug)]
pub struct HitmarkerAdapter {
    http: Arc<HttpFetcher>,
    keywords: Vec<String>,
}

impl HitmarkerAdapter {
    pub fn new(http: Arc<HttpFetcher>, keywords: Vec<String>) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { http, keywords }
    }

    /// Fills `raw` from its detail page. A page that is gone leaves the card as
    /// listed; retryable failures fail the whole list page.
    async fn enrich(&self, ctx: &AdapterContext, raw: &mut RawRecord) -> Result<(), AdapterError> {
        let Some(url) = raw.get("url").map(str::to_string) else {
            return Ok(());
        };
        match self.http.fetch_bytes(ctx.run_id, SOURCE_ID, &url).await {
            Ok(response) => {
                match parse_job_detail(&response.text()) {
                    Ok(detail) => detail.apply_to(raw),
                    Err(message) => warn!(%url, %message, "detail page unreadable, keeping list card"),
                }
                Ok(())
            }
            Err(err @ FetchError::HttpStatus { .. }) if !err.is_retryable() => {
                warn!(%url, error = %err, "detail page unavailable, keeping list card");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SourceAdapter for HitmarkerAdapter {
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
        if at.keyword != 0 {
            return Err(AdapterError::InvalidCursor(
                at.to_cursor().to_string(),
            ));
        }
        let following = Some(at.next_page()?.to_cursor());

        // the site numbers pages from 1
        let url = format!("{BASE_URL}/jobs?page={}", at.page + 1);
        let response = self.http.fetch_bytes(ctx.run_id, SOURCE_ID, &url).await?;
        let fetched_at = Utc::now();

        let (listed, skipped) = parse_list_page(&response.text(), fetched_at)
            .map_err(|message| AdapterError::parse(message, following.clone()))?;
        let next = if listed.is_empty() && skipped.is_empty() {
            None
        } else {
            following
        };

        let listed_count = listed.len();
        let mut records = Vec::with_capacity(listed_count);
        for mut raw in listed {
            self.enrich(ctx, &mut raw).await?;
            if matches_keywords(&raw, &self.keywords) {
                records.push(raw);
            }
        }
        debug!(
            page = at.page,
            listed = listed_count,
            records = records.len(),
            "parsed hitmarker list page"
        );
        Ok(Page {
            records,
            next,
            skipped,
        })
    }
}

/// `/jobs/<slug>-<digits>`; returns the digits.
pub fn listing_id(href: &str) -> Option<&str> {
    let path = href.split(['?', '#']).next()?.trim_end_matches('/');
    let slug = path.rsplit_once("/jobs/").map(|(_, slug)| slug)?;
    let (name, id) = slug.rsplit_once('-')?;
    let valid = !name.is_empty()
        && !slug.contains('/')
        && !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit());
    valid.then_some(id)
}

/// Case-insensitive substring match over title and description.
pub fn matches_keywords(raw: &RawRecord, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!(
        "{} {}",
        raw.get("title").unwrap_or_default(),
        raw.get("description").unwrap_or_default()
    )
    .to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(k.to_lowercase().as_str()))
}

/// Fields only the detail page carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDetail {
    pub description: Option<String>,
    pub employment_type: Option<String>,
    pub experience_level: Option<String>,
    pub salary: Option<String>,
}

impl JobDetail {
    /// Card values win for fields both pages show.
    pub fn apply_to(self, raw: &mut RawRecord) {
        let fields = [
            ("description", self.description, true),
            ("experience_level", self.experience_level, true),
            ("job_type", self.employment_type, false),
            ("salary", self.salary, false),
        ];
        for (key, value, overwrite) in fields {
            let Some(value) = value else { continue };
            if overwrite || raw.get(key).is_none() {
                raw.insert(key, value);
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First short line satisfying `accept`.
fn find_line(lines: &[String], max_len: usize, accept: impl Fn(&str) -> bool) -> Option<String> {
    lines
        .iter()
        .find(|line| line.chars().count() <= max_len && accept(line))
        .cloned()
}

pub fn parse_job_detail(html: &str) -> Result<JobDetail, String> {
    let document = Html::parse_document(html);
    let sel = |css: &str| selector(css).map_err(|e| e.to_string());
    let body = sel("body")?;
    let description = sel(".job-description")?;

    let Some(body) = document.select(&body).next() else {
        return Ok(JobDetail::default());
    };
    let lines = body
        .text()
        .flat_map(|node| node.split('\n'))
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();

    let employment_type = find_line(&lines, 80, |line| {
        EMPLOYMENT_HINTS.iter().any(|hint| line.contains(hint))
    });
    let experience_level = find_line(&lines, 100, |line| {
        line.to_lowercase().contains("years") && line.contains('(') && line.contains(')')
    });
    let salary = find_line(&lines, 120, |line| {
        let lower = line.to_lowercase();
        SALARY_MARKERS.iter().any(|marker| lower.contains(marker))
    });

    let text_root = body.select(&description).next().unwrap_or(body);
    let description = text_or_none(
        collapse_whitespace(&text_root.text().collect::<Vec<_>>().join(" "))
            .chars()
            .take(DESCRIPTION_LIMIT)
            .collect(),
    );

    Ok(JobDetail {
        description,
        employment_type,
        experience_level,
        salary,
    })
}

pub fn parse_list_page(
    html: &str,
    fetched_at: DateTime<Utc>,
) -> Result<(Vec<RawRecord>, Vec<String>), String> {
    let document = Html::parse_document(html);
    let sel = |css: &str| selector(css).map_err(|e| e.to_string());

    let list = sel(".jobs-list")?;
    let card_sel = sel("article.job-listing")?;
    let link = sel("a.job-listing__link")?;
    let title = sel(".job-listing__title")?;
    let company = sel(".job-listing__company")?;
    let location = sel(".job-listing__location")?;
    let job_type = sel(".job-listing__type")?;
    let salary = sel(".job-listing__salary")?;
    let tags = sel(".job-listing__tags li")?;
    let posted = sel("time.job-listing__posted")?;

    let Some(list) = document.select(&list).next() else {
        return Err("job list container not found".to_string());
    };

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (index, card) in list.select(&card_sel).enumerate() {
        let Some(href) = select_first_attr(card, &link, "href") else {
            skipped.push(format!("listing {index}: no job link"));
            continue;
        };
        let Some(id) = listing_id(&href) else {
            skipped.push(format!("listing {index}: {href} is not a job detail link"));
            continue;
        };

        let mut raw = RawRecord::new(SOURCE_ID, fetched_at)
            .with("external_id", id)
            .with("url", absolute_url(BASE_URL, &href));
        for (key, sel) in [
            ("title", &title),
            ("company", &company),
            ("location", &location),
            ("job_type", &job_type),
            ("salary", &salary),
        ] {
            if let Some(value) = select_first_text(card, sel) {
                raw.insert(key, value);
            }
        }
        // machine-readable timestamp first, visible text as a fallback
        if let Some(value) = select_first_attr(card, &posted, "datetime")
            .or_else(|| select_first_text(card, &posted))
        {
            raw.insert("posted_date", value);
        }
        let card_tags = select_all_texts(card, &tags);
        if !card_tags.is_empty() {
            raw.insert("skills", card_tags.join(", "));
        }
        records.push(raw);
    }
    Ok((records, skipped))
}

//! Pure field rules turning a [`RawRecord`] into a canonical [`JobRecord`].
//!
//! Nothing here touches the network or the store; every rule is a function of its
//! inputs plus the source's [`SourceProfile`] and the record's fetch time.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::identity::{resolve_parts, IdentityInput};
use crate::{CanonicalField, JobRecord, RawRecord, RejectionReason, SalaryPeriod, SalaryRange, SourceProfile};

pub fn normalize(raw: &RawRecord, profile: &SourceProfile) -> Result<JobRecord, RejectionReason> {
    let field = |f: CanonicalField| profile.fields.lookup(raw, f);
    let text = |f: CanonicalField| field(f).and_then(clean_text);

    let title = text(CanonicalField::Title).ok_or(RejectionReason::MissingTitle)?;
    let url = text(CanonicalField::Url).ok_or(RejectionReason::MissingUrl)?;
    let posted_raw = text(CanonicalField::PostedDate).ok_or(RejectionReason::MissingPostedDate)?;
    let posted_date = parse_posted_date(&posted_raw, raw.fetched_at, &profile.dates)
        .ok_or(RejectionReason::UnparseableDate { raw: posted_raw })?;

    let skills = field(CanonicalField::Skills)
        .map(|s| split_skills(s, &profile.skill_delimiters))
        .unwrap_or_default();
    let salary_text = text(CanonicalField::Salary);
    let salary = salary_text.as_deref().and_then(parse_salary);
    let job_type = text(CanonicalField::JobType).or_else(|| {
        if profile.infer_job_type {
            infer_job_type(&skills)
        } else {
            None
        }
    });

    let source = profile.source_id.clone();
    let external_id = text(CanonicalField::ExternalId);
    let company = text(CanonicalField::Company);
    let location = text(CanonicalField::Location);

    let identity_key = resolve_parts(
        &IdentityInput {
            source: &source,
            external_id: external_id.as_deref(),
            title: &title,
            company: company.as_deref(),
            location: location.as_deref(),
        },
        profile.identity,
    )?;

    Ok(JobRecord {
        source,
        external_id,
        title,
        subtitle: text(CanonicalField::Subtitle),
        company,
        location,
        location_detail: text(CanonicalField::LocationDetail),
        skills,
        salary_text,
        salary,
        education: text(CanonicalField::Education),
        job_type,
        url,
        description: text(CanonicalField::Description),
        posted_date,
        identity_key,
    })
}

// ---------------------------------------------------------------------------
// text

/// Strips markup, decodes common entities and collapses whitespace.
pub fn clean_text(input: &str) -> Option<String> {
    let text = collapse_whitespace(&decode_entities(&strip_markup(input)));
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replaces every tag with a line break so block boundaries survive as delimiters.
pub fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        let opens_tag = ch == '<'
            && chars
                .peek()
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '/' || *next == '!');
        if !opens_tag {
            out.push(ch);
            continue;
        }
        for inner in chars.by_ref() {
            if inner == '>' {
                break;
            }
        }
        out.push('\n');
    }
    out
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    input
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// skills

const BULLET_PREFIXES: &[char] = &['-', '*', '+', '>'];

/// Splits a multi-valued skills field, case-folds and de-duplicates.
pub fn split_skills(input: &str, delimiters: &[char]) -> BTreeSet<String> {
    decode_entities(&strip_markup(input))
        .split(|c: char| delimiters.contains(&c))
        .map(|token| token.trim().trim_start_matches(BULLET_PREFIXES))
        .map(collapse_whitespace)
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

const JOB_TYPE_TAGS: &[(&str, &str)] = &[
    ("fulltime", "Full-time"),
    ("full", "Full-time"),
    ("parttime", "Part-time"),
    ("part", "Part-time"),
    ("contract", "Contract"),
    ("freelance", "Freelance"),
    ("internship", "Internship"),
];

/// Reads an employment type out of tag-style skills (`full-time`, `Full Time`).
fn infer_job_type(skills: &BTreeSet<String>) -> Option<String> {
    skills.iter().find_map(|skill| {
        let squashed = skill.replace(['-', ' ', '_'], "");
        JOB_TYPE_TAGS
            .iter()
            .find(|(tag, _)| squashed == *tag)
            .map(|(_, label)| (*label).to_string())
    })
}

// ---------------------------------------------------------------------------
// salary

const MIN_PLAUSIBLE_AMOUNT: f64 = 10.0;

const CURRENCY_SYMBOLS: &[(char, &str)] = &[
    ('$', "USD"),
    ('€', "EUR"),
    ('£', "GBP"),
    ('₽', "RUB"),
    ('₸', "KZT"),
];

const CURRENCY_WORDS: &[(&str, &str)] = &[
    ("usd", "USD"),
    ("eur", "EUR"),
    ("gbp", "GBP"),
    ("rub", "RUB"),
    ("руб", "RUB"),
    ("kzt", "KZT"),
    ("тенге", "KZT"),
    ("uzs", "UZS"),
    ("сум", "UZS"),
    ("uah", "UAH"),
    ("cad", "CAD"),
    ("aud", "AUD"),
    ("chf", "CHF"),
];

/// Extracts a numeric range from salary text; `None` when no amount is recognizable.
pub fn parse_salary(text: &str) -> Option<SalaryRange> {
    let text = drop_parenthesized(&text.replace(['–', '—'], "-"));
    let lower = text.to_lowercase();

    let amounts = extract_amounts(&text)
        .into_iter()
        .filter(|n| *n >= MIN_PLAUSIBLE_AMOUNT)
        .collect::<Vec<_>>();
    let (low, high) = match amounts.as_slice() {
        [] => return None,
        [only] if starts_with_any(&lower, &["up to", "до ", "max"]) => (None, Some(*only)),
        [only] if starts_with_any(&lower, &["from", "от ", "min", "starting"]) => (Some(*only), None),
        [only] => (Some(*only), Some(*only)),
        [a, b, ..] => (Some(a.min(*b)), Some(a.max(*b))),
    };

    Some(SalaryRange {
        low,
        high,
        currency: detect_currency(&text, &lower),
        period: detect_period(&lower),
    })
}

fn starts_with_any(text: &str, prefixes: &[&str]) -> bool {
    let text = text.trim_start();
    prefixes.iter().any(|p| text.starts_with(p))
}

fn drop_parenthesized(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

fn detect_currency(text: &str, lower: &str) -> Option<String> {
    if let Some((_, code)) = CURRENCY_SYMBOLS.iter().find(|(sym, _)| text.contains(*sym)) {
        return Some((*code).to_string());
    }
    lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            CURRENCY_WORDS
                .iter()
                .find(|(needle, _)| word.starts_with(needle))
                .map(|(_, code)| (*code).to_string())
        })
}

fn detect_period(lower: &str) -> Option<SalaryPeriod> {
    let has_word = |words: &[&str]| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| words.iter().any(|needle| w.starts_with(needle)))
    };
    if lower.contains("/yr") || has_word(&["year", "yr", "annual", "annum", "год"]) {
        Some(SalaryPeriod::Year)
    } else if lower.contains("/mo") || has_word(&["month", "мес"]) {
        Some(SalaryPeriod::Month)
    } else if lower.contains("/hr") || has_word(&["hour", "hr", "час"]) {
        Some(SalaryPeriod::Hour)
    } else {
        None
    }
}

fn is_group_separator(ch: char) -> bool {
    matches!(ch, ',' | ' ' | '\u{a0}' | '\u{202f}' | '\'')
}

/// Reads money-like numbers: thousands groups, one decimal part, `k` suffix.
fn extract_amounts(text: &str) -> Vec<f64> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let mut digits = String::new();
        while i < chars.len() && chars[i].is_ascii_digit() {
            digits.push(chars[i]);
            i += 1;
        }
        // thousands groups: separator followed by exactly three digits
        while i < chars.len()
            && is_group_separator(chars[i])
            && chars.get(i + 1..i + 4).is_some_and(|g| g.iter().all(char::is_ascii_digit))
            && !chars.get(i + 4).is_some_and(char::is_ascii_digit)
        {
            digits.extend(&chars[i + 1..i + 4]);
            i += 4;
        }
        if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
            digits.push('.');
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                digits.push(chars[i]);
                i += 1;
            }
        }

        let Ok(mut value) = digits.parse::<f64>() else {
            continue;
        };
        let suffix_k = matches!(chars.get(i), Some('k') | Some('K'))
            && !chars.get(i + 1).is_some_and(|c| c.is_alphabetic());
        if suffix_k {
            value *= 1000.0;
            i += 1;
        }
        out.push(value);
    }
    out
}

// ---------------------------------------------------------------------------
// dates

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Phrases a source uses for dates, beyond the absolute formats every source shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateVocabulary {
    pub prefixes: Vec<String>,
    pub today: Vec<String>,
    pub yesterday: Vec<String>,
    pub ago: Vec<String>,
    pub units: Vec<(String, RelativeUnit)>,
    pub months: Vec<(String, u32)>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

impl DateVocabulary {
    pub fn english() -> Self {
        Self {
            prefixes: owned(&["posted on", "posted", "updated:", "updated", "published", "date:"]),
            today: owned(&["today", "just now", "just posted", "new"]),
            yesterday: owned(&["yesterday"]),
            ago: owned(&["ago"]),
            units: vec![
                ("min".to_string(), RelativeUnit::Minute),
                ("hour".to_string(), RelativeUnit::Hour),
                ("hr".to_string(), RelativeUnit::Hour),
                ("day".to_string(), RelativeUnit::Day),
                ("week".to_string(), RelativeUnit::Week),
                ("month".to_string(), RelativeUnit::Month),
                ("year".to_string(), RelativeUnit::Year),
            ],
            months: [
                "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
            ]
            .iter()
            .zip(1u32..)
            .map(|(name, n)| ((*name).to_string(), n))
            .collect(),
        }
    }

    /// English plus the Russian phrasing used by CIS job boards.
    pub fn russian() -> Self {
        let mut vocab = Self::english();
        vocab
            .prefixes
            .extend(owned(&["опубликована", "опубликовано", "размещено", "обновлено"]));
        vocab.today.extend(owned(&["сегодня", "только что"]));
        vocab.yesterday.extend(owned(&["вчера"]));
        vocab.ago.extend(owned(&["назад"]));
        vocab.units.extend([
            ("минут".to_string(), RelativeUnit::Minute),
            ("час".to_string(), RelativeUnit::Hour),
            ("день".to_string(), RelativeUnit::Day),
            ("дня".to_string(), RelativeUnit::Day),
            ("дней".to_string(), RelativeUnit::Day),
            ("недел".to_string(), RelativeUnit::Week),
            ("месяц".to_string(), RelativeUnit::Month),
            ("год".to_string(), RelativeUnit::Year),
            ("лет".to_string(), RelativeUnit::Year),
        ]);
        vocab.months.extend(
            [
                "январ", "феврал", "март", "апрел", "ма", "июн", "июл", "август", "сентябр",
                "октябр", "ноябр", "декабр",
            ]
            .iter()
            .zip(1u32..)
            .map(|(name, n)| ((*name).to_string(), n)),
        );
        vocab
    }

    fn month(&self, word: &str) -> Option<u32> {
        self.months
            .iter()
            .find(|(prefix, _)| word.starts_with(prefix.as_str()))
            .map(|(_, n)| *n)
    }

    fn unit(&self, word: &str) -> Option<RelativeUnit> {
        self.units
            .iter()
            .find(|(prefix, _)| word.starts_with(prefix.as_str()))
            .map(|(_, unit)| *unit)
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%d %b %Y",
];

/// Resolves absolute formats first, then relative phrases against `fetched_at`.
pub fn parse_posted_date(
    input: &str,
    fetched_at: DateTime<Utc>,
    vocab: &DateVocabulary,
) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if let Some(date) = parse_absolute(trimmed) {
        return Some(date);
    }

    let lower = strip_prefixes(&trimmed.to_lowercase(), &vocab.prefixes);
    parse_absolute(&lower)
        .or_else(|| parse_relative(&lower, fetched_at, vocab))
        .or_else(|| parse_month_name(&lower, fetched_at.date_naive(), vocab))
}

fn strip_prefixes(lower: &str, prefixes: &[String]) -> String {
    let mut text = lower.trim();
    for prefix in prefixes {
        if let Some(rest) = text.strip_prefix(prefix.as_str()) {
            text = rest.trim_start_matches([':', ' ']).trim();
        }
    }
    text.to_string()
}

fn parse_absolute(text: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        })
}

fn parse_relative(lower: &str, fetched_at: DateTime<Utc>, vocab: &DateVocabulary) -> Option<NaiveDate> {
    let today = fetched_at.date_naive();
    if vocab
        .today
        .iter()
        .any(|p| lower == p.as_str() || lower.starts_with(&format!("{p} ")))
    {
        return Some(today);
    }
    if vocab.yesterday.iter().any(|p| lower.starts_with(p.as_str())) {
        return today.pred_opt();
    }

    if let Some((n, unit)) = parse_compact_age(lower) {
        return shift_back(fetched_at, n, unit);
    }

    if !vocab.ago.iter().any(|marker| lower.contains(marker.as_str())) {
        return None;
    }
    let words = lower
        .split(|c: char| c.is_whitespace() || c == '+')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>();
    words.iter().enumerate().find_map(|(i, word)| {
        let unit = vocab.unit(word)?;
        let n = match i.checked_sub(1).map(|j| words[j]) {
            Some(prev) => prev.parse::<u32>().ok().or(matches!(prev, "a" | "an").then_some(1))?,
            None => 1,
        };
        shift_back(fetched_at, n, unit)
    })
}

/// `7h`, `2d`, `3w`, `1mo`, `1y`, `45m`, `30d+`.
fn parse_compact_age(lower: &str) -> Option<(u32, RelativeUnit)> {
    let compact = lower.trim().trim_end_matches('+').replace(' ', "");
    let split = compact.find(|c: char| !c.is_ascii_digit())?;
    let (digits, suffix) = compact.split_at(split);
    let n = digits.parse::<u32>().ok()?;
    let unit = match suffix {
        "m" | "min" => RelativeUnit::Minute,
        "h" | "hr" => RelativeUnit::Hour,
        "d" => RelativeUnit::Day,
        "w" => RelativeUnit::Week,
        "mo" => RelativeUnit::Month,
        "y" | "yr" => RelativeUnit::Year,
        _ => return None,
    };
    Some((n, unit))
}

/// Steps back from `fetched_at`; `None` when the offset leaves chrono's range.
fn shift_back(fetched_at: DateTime<Utc>, n: u32, unit: RelativeUnit) -> Option<NaiveDate> {
    let n64 = i64::from(n);
    let offset = match unit {
        RelativeUnit::Minute => TimeDelta::try_minutes(n64)?,
        RelativeUnit::Hour => TimeDelta::try_hours(n64)?,
        RelativeUnit::Day => TimeDelta::try_days(n64)?,
        RelativeUnit::Week => TimeDelta::try_weeks(n64)?,
        RelativeUnit::Month => {
            return fetched_at.date_naive().checked_sub_months(Months::new(n));
        }
        RelativeUnit::Year => {
            return fetched_at
                .date_naive()
                .checked_sub_months(Months::new(n.checked_mul(12)?));
        }
    };
    fetched_at
        .checked_sub_signed(offset)
        .map(|shifted| shifted.date_naive())
}

/// `12 октября 2025`, `oct 12`, `12 oct`; a missing year means the latest past occurrence.
fn parse_month_name(lower: &str, today: NaiveDate, vocab: &DateVocabulary) -> Option<NaiveDate> {
    let words = lower
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>();
    let (month_idx, month) = words
        .iter()
        .enumerate()
        .find_map(|(i, w)| vocab.month(w).filter(|_| w.chars().all(char::is_alphabetic)).map(|m| (i, m)))?;

    let numbers = words
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != month_idx)
        .filter_map(|(_, w)| w.parse::<i32>().ok())
        .collect::<Vec<_>>();
    let day = numbers.iter().copied().find(|n| (1..=31).contains(n))?;
    let year = numbers.iter().copied().find(|n| *n >= 1000);

    match year {
        Some(year) => NaiveDate::from_ymd_opt(year, month, day as u32),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day as u32)?;
            if this_year > today {
                NaiveDate::from_ymd_opt(today.year() - 1, month, day as u32)
            } else {
                Some(this_year)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldMap, IdentityStrategy};
    use chrono::TimeZone;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn content_profile() -> SourceProfile {
        SourceProfile::new("hitmarker", IdentityStrategy::ContentHash)
    }

    fn scenario_raw() -> RawRecord {
        RawRecord::new("hitmarker", fetched_at())
            .with("title", "Backend Engineer")
            .with("company", "Acme")
            .with("location", "Tashkent")
            .with("skills", "Python, SQL, Python")
            .with("url", "https://example.test/jobs/backend-engineer-1")
            .with("posted_date", "today")
    }

    #[test]
    fn scenario_record_normalizes_with_folded_skills_and_identity() {
        let record = normalize(&scenario_raw(), &content_profile()).unwrap();
        assert_eq!(
            record.skills.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["python", "sql"]
        );
        assert!(!record.identity_key.as_str().is_empty());
        assert_eq!(record.posted_date, ymd(2026, 3, 10));
        assert_eq!(record.source, "hitmarker");
    }

    #[test]
    fn missing_title_is_rejected_whatever_else_is_present() {
        for title in [None, Some(""), Some("   "), Some("<b> </b>")] {
            let mut raw = RawRecord::new("hitmarker", fetched_at())
                .with("company", "Acme")
                .with("url", "https://example.test/1")
                .with("posted_date", "2026-01-01");
            if let Some(t) = title {
                raw.insert("title", t);
            }
            assert_eq!(
                normalize(&raw, &content_profile()),
                Err(RejectionReason::MissingTitle)
            );
        }
    }

    #[test]
    fn missing_url_and_dates_are_rejected() {
        let mut raw = scenario_raw();
        raw.insert("url", " ");
        assert_eq!(normalize(&raw, &content_profile()), Err(RejectionReason::MissingUrl));

        let mut raw = scenario_raw();
        raw.insert("posted_date", "");
        assert_eq!(
            normalize(&raw, &content_profile()),
            Err(RejectionReason::MissingPostedDate)
        );

        let mut raw = scenario_raw();
        raw.insert("posted_date", "sometime soon");
        assert_eq!(
            normalize(&raw, &content_profile()),
            Err(RejectionReason::UnparseableDate {
                raw: "sometime soon".to_string()
            })
        );
    }

    #[test]
    fn native_profile_rejects_records_without_external_id() {
        let profile = SourceProfile::new("hh", IdentityStrategy::NativeId);
        assert_eq!(
            normalize(&scenario_raw(), &profile),
            Err(RejectionReason::MissingExternalId)
        );
        let raw = scenario_raw().with("external_id", "123456");
        assert_eq!(normalize(&raw, &profile).unwrap().external_id.as_deref(), Some("123456"));
    }

    #[test]
    fn field_map_routes_site_keys() {
        let profile = SourceProfile::new("remotive", IdentityStrategy::NativeId).with_fields(
            FieldMap::default()
                .alias(CanonicalField::Company, "company_name")
                .alias(CanonicalField::PostedDate, "publication_date"),
        );
        let raw = RawRecord::new("remotive", fetched_at())
            .with("external_id", "remotive_1")
            .with("title", "Data Engineer")
            .with("company_name", "Globex")
            .with("url", "https://remotive.com/remote-jobs/1")
            .with("publication_date", "2026-02-27T09:15:02");
        let record = normalize(&raw, &profile).unwrap();
        assert_eq!(record.company.as_deref(), Some("Globex"));
        assert_eq!(record.posted_date, ymd(2026, 2, 27));
    }

    #[test]
    fn free_text_is_stripped_and_collapsed() {
        let raw = scenario_raw().with(
            "description",
            "<p>We&nbsp;build   <b>fast</b>\n\n systems &amp; tools.</p>",
        );
        let record = normalize(&raw, &content_profile()).unwrap();
        assert_eq!(
            record.description.as_deref(),
            Some("We build fast systems & tools.")
        );
        assert_eq!(clean_text("salary < 5000"), Some("salary < 5000".to_string()));
    }

    #[test]
    fn skills_split_on_bullets_newlines_and_markup() {
        let skills = split_skills(
            "• Rust\n• Tokio · PostgreSQL | rust\n<li>CI/CD</li><li> - Docker</li>",
            crate::DEFAULT_SKILL_DELIMITERS,
        );
        assert_eq!(
            skills.into_iter().collect::<Vec<_>>(),
            vec!["ci/cd", "docker", "postgresql", "rust", "tokio"]
        );
    }

    #[test]
    fn job_type_is_inferred_from_tags_only_when_enabled() {
        let raw = scenario_raw().with("skills", "Golang, Full Time, Remote");
        let plain = normalize(&raw, &content_profile()).unwrap();
        assert_eq!(plain.job_type, None);
        let inferred = normalize(&raw, &content_profile().inferring_job_type()).unwrap();
        assert_eq!(inferred.job_type.as_deref(), Some("Full-time"));
    }

    #[test]
    fn salary_ranges_are_extracted() {
        let range = parse_salary("$80,000 – $120,000 a year (Employer provided)").unwrap();
        assert_eq!(range.low, Some(80_000.0));
        assert_eq!(range.high, Some(120_000.0));
        assert_eq!(range.currency.as_deref(), Some("USD"));
        assert_eq!(range.period, Some(SalaryPeriod::Year));

        let range = parse_salary("от 15 000 000 сум на руки").unwrap();
        assert_eq!(range.low, Some(15_000_000.0));
        assert_eq!(range.high, None);
        assert_eq!(range.currency.as_deref(), Some("UZS"));

        let range = parse_salary("up to 5k EUR / month").unwrap();
        assert_eq!((range.low, range.high), (None, Some(5_000.0)));
        assert_eq!(range.currency.as_deref(), Some("EUR"));
        assert_eq!(range.period, Some(SalaryPeriod::Month));

        let range = parse_salary("45.50 per hour").unwrap();
        assert_eq!((range.low, range.high), (Some(45.5), Some(45.5)));
        assert_eq!(range.currency, None);
        assert_eq!(range.period, Some(SalaryPeriod::Hour));
    }

    #[test]
    fn salary_without_amount_keeps_text_but_no_range() {
        assert_eq!(parse_salary("Competitive"), None);
        assert_eq!(parse_salary("3-5 years"), None);
        let raw = scenario_raw().with("salary", "  Competitive  ");
        let record = normalize(&raw, &content_profile()).unwrap();
        assert_eq!(record.salary_text.as_deref(), Some("Competitive"));
        assert_eq!(record.salary, None);
    }

    #[test]
    fn absolute_date_formats_are_tried_in_order() {
        let vocab = DateVocabulary::english();
        let at = fetched_at();
        assert_eq!(parse_posted_date("2026-02-01", at, &vocab), Some(ymd(2026, 2, 1)));
        assert_eq!(parse_posted_date("2026-02-01T23:30:00Z", at, &vocab), Some(ymd(2026, 2, 1)));
        assert_eq!(parse_posted_date("05.02.2026", at, &vocab), Some(ymd(2026, 2, 5)));
        assert_eq!(parse_posted_date("02/05/2026", at, &vocab), Some(ymd(2026, 2, 5)));
        assert_eq!(parse_posted_date("25/02/2026", at, &vocab), Some(ymd(2026, 2, 25)));
        assert_eq!(parse_posted_date("February 3, 2026", at, &vocab), Some(ymd(2026, 2, 3)));
        assert_eq!(parse_posted_date("Updated: 2026-01-30", at, &vocab), Some(ymd(2026, 1, 30)));
    }

    #[test]
    fn relative_dates_resolve_against_fetch_time() {
        let vocab = DateVocabulary::english();
        let at = fetched_at();
        assert_eq!(parse_posted_date("Today", at, &vocab), Some(ymd(2026, 3, 10)));
        assert_eq!(parse_posted_date("yesterday", at, &vocab), Some(ymd(2026, 3, 9)));
        assert_eq!(parse_posted_date("3 days ago", at, &vocab), Some(ymd(2026, 3, 7)));
        assert_eq!(parse_posted_date("Posted 30+ days ago", at, &vocab), Some(ymd(2026, 2, 8)));
        assert_eq!(parse_posted_date("an hour ago", at, &vocab), Some(ymd(2026, 3, 10)));
        assert_eq!(parse_posted_date("2d", at, &vocab), Some(ymd(2026, 3, 8)));
        assert_eq!(parse_posted_date("30d+", at, &vocab), Some(ymd(2026, 2, 8)));
        assert_eq!(parse_posted_date("13h", at, &vocab), Some(ymd(2026, 3, 9)));
        assert_eq!(parse_posted_date("1mo", at, &vocab), Some(ymd(2026, 2, 10)));
        assert_eq!(parse_posted_date("2 weeks", at, &vocab), None);
    }

    #[test]
    fn out_of_range_ages_are_unparseable_not_fatal() {
        let vocab = DateVocabulary::english();
        let at = fetched_at();
        assert_eq!(parse_posted_date("4000000000h", at, &vocab), None);
        assert_eq!(parse_posted_date("99999999 days ago", at, &vocab), None);
        assert_eq!(parse_posted_date("4000000000 weeks ago", at, &vocab), None);

        let raw = scenario_raw().with("posted_date", "99999999 days ago");
        assert_eq!(
            normalize(&raw, &content_profile()),
            Err(RejectionReason::UnparseableDate {
                raw: "99999999 days ago".to_string()
            })
        );
    }

    #[test]
    fn localized_vocabulary_is_per_source() {
        let at = fetched_at();
        let ru = DateVocabulary::russian();
        assert_eq!(parse_posted_date("вчера", at, &ru), Some(ymd(2026, 3, 9)));
        assert_eq!(parse_posted_date("5 дней назад", at, &ru), Some(ymd(2026, 3, 5)));
        assert_eq!(
            parse_posted_date("Опубликована 12 октября 2025", at, &ru),
            Some(ymd(2025, 10, 12))
        );
        assert_eq!(parse_posted_date("2 марта", at, &ru), Some(ymd(2026, 3, 2)));
        assert_eq!(parse_posted_date("20 мая", at, &ru), Some(ymd(2025, 5, 20)));
        assert_eq!(parse_posted_date("вчера", at, &DateVocabulary::english()), None);
    }

    #[test]
    fn english_month_names_without_year() {
        let vocab = DateVocabulary::english();
        assert_eq!(parse_posted_date("Mar 4", fetched_at(), &vocab), Some(ymd(2026, 3, 4)));
        assert_eq!(parse_posted_date("Dec 24", fetched_at(), &vocab), Some(ymd(2025, 12, 24)));
    }
}

//! Identity resolution: the stable key that makes upserts idempotent across runs.
//!
//! Keys are SHA-256 over a versioned, unit-separator-joined field list, so they do
//! not depend on process, platform, or `Hash` impls.

use sha2::{Digest, Sha256};

use crate::{IdentityKey, IdentityStrategy, JobRecord, RejectionReason};

const KEY_VERSION: &str = "v1";
const FIELD_SEPARATOR: char = '\u{1f}';

/// The fields identity is derived from, borrowed from a record under construction.
#[derive(Debug, Clone, Copy)]
pub struct IdentityInput<'a> {
    pub source: &'a str,
    pub external_id: Option<&'a str>,
    pub title: &'a str,
    pub company: Option<&'a str>,
    pub location: Option<&'a str>,
}

impl<'a> From<&'a JobRecord> for IdentityInput<'a> {
    fn from(record: &'a JobRecord) -> Self {
        Self {
            source: &record.source,
            external_id: record.external_id.as_deref(),
            title: &record.title,
            company: record.company.as_deref(),
            location: record.location.as_deref(),
        }
    }
}

pub fn resolve(record: &JobRecord, strategy: IdentityStrategy) -> Result<IdentityKey, RejectionReason> {
    resolve_parts(&IdentityInput::from(record), strategy)
}

pub fn resolve_parts(
    input: &IdentityInput<'_>,
    strategy: IdentityStrategy,
) -> Result<IdentityKey, RejectionReason> {
    let source = input.source.trim().to_lowercase();
    match strategy {
        IdentityStrategy::NativeId => {
            let external_id = input
                .external_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or(RejectionReason::MissingExternalId)?;
            Ok(digest(&[KEY_VERSION, "native", &source, external_id]))
        }
        IdentityStrategy::ContentHash => {
            let title = fingerprint_fragment(input.title);
            let company = fingerprint_fragment(input.company.unwrap_or_default());
            let location = fingerprint_fragment(input.location.unwrap_or_default());
            Ok(digest(&[KEY_VERSION, "content", &source, &title, &company, &location]))
        }
    }
}

/// Case-folds and reduces to alphanumeric words so cosmetic edits hash identically.
pub fn fingerprint_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn digest(parts: &[&str]) -> IdentityKey {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(part.as_bytes());
    }
    IdentityKey::from_hex(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(title: &'a str, company: &'a str, location: &'a str) -> IdentityInput<'a> {
        IdentityInput {
            source: "hitmarker",
            external_id: None,
            title,
            company: Some(company),
            location: Some(location),
        }
    }

    #[test]
    fn native_key_is_stable_across_runs() {
        let key = resolve_parts(
            &IdentityInput {
                source: "remotive",
                external_id: Some("remotive_1904312"),
                title: "anything",
                company: None,
                location: None,
            },
            IdentityStrategy::NativeId,
        )
        .unwrap();
        assert_eq!(
            key.as_str(),
            "bb9204f7b28a2f249f937824146d134c34946c2220c17983df05d9053547ee68"
        );
    }

    #[test]
    fn content_key_is_stable_across_runs() {
        let key = resolve_parts(&input("Backend Engineer", "Acme", "Tashkent"), IdentityStrategy::ContentHash)
            .unwrap();
        assert_eq!(
            key.as_str(),
            "50dcff17985cc9335e4f6825edf26ea763f414042ea5e720bbc5379315e07ceb"
        );
    }

    #[test]
    fn content_key_ignores_case_whitespace_and_punctuation() {
        let a = resolve_parts(&input("Backend Engineer", "Acme", "Tashkent"), IdentityStrategy::ContentHash);
        let b = resolve_parts(
            &input("  backend   ENGINEER ", "ACME.", "Tashkent,"),
            IdentityStrategy::ContentHash,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn native_key_ignores_everything_but_source_and_id() {
        let a = IdentityInput {
            source: "hh",
            external_id: Some("123456"),
            title: "Backend Engineer",
            company: Some("Acme"),
            location: Some("Tashkent"),
        };
        let b = IdentityInput {
            title: "backend engineer (remote)",
            company: None,
            location: Some("Samarkand"),
            ..a
        };
        assert_eq!(
            resolve_parts(&a, IdentityStrategy::NativeId),
            resolve_parts(&b, IdentityStrategy::NativeId)
        );
    }

    #[test]
    fn sources_partition_the_key_space() {
        let hh = IdentityInput {
            source: "hh",
            external_id: Some("42"),
            title: "t",
            company: None,
            location: None,
        };
        let remotive = IdentityInput { source: "remotive", ..hh };
        assert_ne!(
            resolve_parts(&hh, IdentityStrategy::NativeId),
            resolve_parts(&remotive, IdentityStrategy::NativeId)
        );
    }

    #[test]
    fn separator_prevents_field_boundary_collisions() {
        let a = resolve_parts(&input("ab", "c", ""), IdentityStrategy::ContentHash);
        let b = resolve_parts(&input("a", "bc", ""), IdentityStrategy::ContentHash);
        assert_ne!(a, b);
    }

    #[test]
    fn native_strategy_without_id_is_rejected() {
        let result = resolve_parts(&input("t", "c", "l"), IdentityStrategy::NativeId);
        assert_eq!(result, Err(RejectionReason::MissingExternalId));
    }

    fn raw_record(title: &str, company: &str, description: &str) -> crate::RawRecord {
        let fetched_at = chrono::DateTime::parse_from_rfc3339("2026-03-10T08:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        crate::RawRecord::new("hh", fetched_at)
            .with("external_id", "123456")
            .with("title", title)
            .with("company", company)
            .with("location", "Tashkent")
            .with("description", description)
            .with("url", "https://tashkent.hh.uz/vacancy/123456")
            .with("posted_date", "2026-03-01")
    }

    #[test]
    fn records_differing_cosmetically_resolve_to_their_stored_key() {
        for strategy in [IdentityStrategy::NativeId, IdentityStrategy::ContentHash] {
            let profile = crate::SourceProfile::new("hh", strategy);
            let a = crate::normalize(
                &raw_record("Backend Engineer", "Acme", "Build services."),
                &profile,
            )
            .unwrap();
            let mut b = a.clone();
            b.title = "  backend   ENGINEER ".to_string();
            b.company = Some("ACME".to_string());
            b.description = Some("build   SERVICES.".to_string());

            assert_eq!(resolve(&a, strategy), Ok(a.identity_key.clone()));
            assert_eq!(resolve(&b, strategy), Ok(a.identity_key.clone()));
        }
    }

    #[test]
    fn fingerprint_keeps_non_ascii_letters() {
        assert_eq!(fingerprint_fragment("Разработчик  Python!"), "разработчик python");
    }
}

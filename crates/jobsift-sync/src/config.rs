use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use jobsift_adapters::{adapter_for_source, profile_for_source, FixtureAdapter, SourceAdapter, LIVE_SOURCES};
use jobsift_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub sources_path: PathBuf,
    pub reports_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_pages: usize,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            sources_path: lookup("JOBSIFT_SOURCES")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./sources.yaml")),
            reports_dir: lookup("JOBSIFT_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            user_agent: lookup("JOBSIFT_USER_AGENT")
                .unwrap_or_else(|| format!("jobsift/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: parsed("JOBSIFT_HTTP_TIMEOUT_SECS", 20),
            max_retries: parsed("JOBSIFT_MAX_RETRIES", 3) as usize,
            backoff_base_ms: parsed("JOBSIFT_BACKOFF_BASE_MS", 250),
            backoff_max_ms: parsed("JOBSIFT_BACKOFF_MAX_MS", 5000),
            max_pages: parsed("JOBSIFT_MAX_PAGES", 50) as usize,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    Live,
    Fixture,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Replay file for `mode: fixture`, relative to the registry file.
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

fn enabled_by_default() -> bool {
    true
}

/// The registration table: which sources exist and how each one runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut registry =
            Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        registry.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(registry)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.source_id.as_str()) {
                bail!("source {} is registered twice", source.source_id);
            }
            if !LIVE_SOURCES.contains(&source.source_id.as_str()) {
                bail!(
                    "no adapter for source {} (known: {})",
                    source.source_id,
                    LIVE_SOURCES.join(", ")
                );
            }
            if source.mode == SourceMode::Fixture && source.fixture.is_none() {
                bail!("source {} is in fixture mode but names no fixture", source.source_id);
            }
        }
        Ok(())
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// `all` (or nothing) picks every enabled source; explicit ids run even if disabled.
    pub fn select(&self, requested: &[String]) -> Result<Vec<&SourceConfig>> {
        if requested.is_empty() || requested.iter().any(|r| r == "all") {
            return Ok(self.sources.iter().filter(|s| s.enabled).collect());
        }
        requested
            .iter()
            .map(|id| {
                self.get(id)
                    .with_context(|| format!("source {id} is not in the registry"))
            })
            .collect()
    }

    pub fn build_adapter(
        &self,
        source: &SourceConfig,
        http: &Arc<HttpFetcher>,
    ) -> Result<Arc<dyn SourceAdapter>> {
        match source.mode {
            SourceMode::Live => adapter_for_source(&source.source_id, source.keywords.clone(), Arc::clone(http))
                .map(Arc::from)
                .with_context(|| format!("no live adapter for {}", source.source_id)),
            SourceMode::Fixture => {
                let profile = profile_for_source(&source.source_id)
                    .with_context(|| format!("no profile for {}", source.source_id))?;
                let fixture = source
                    .fixture
                    .as_ref()
                    .with_context(|| format!("source {} names no fixture", source.source_id))?;
                let adapter = FixtureAdapter::load(self.base_dir.join(fixture), profile)?;
                Ok(Arc::new(adapter))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const REGISTRY: &str = r#"
sources:
  - source_id: remotive
    display_name: Remotive
    keywords: [python, data engineer]
  - source_id: hh
    display_name: HeadHunter Uzbekistan
    enabled: false
    max_pages: 5
  - source_id: hitmarker
    display_name: Hitmarker
    mode: fixture
    fixture: fixtures/hitmarker/replay.json
"#;

    #[test]
    fn config_reads_env_with_defaults() {
        let env = HashMap::from([
            ("JOBSIFT_MAX_RETRIES", "5"),
            ("JOBSIFT_BACKOFF_BASE_MS", "100"),
            ("JOBSIFT_MAX_PAGES", "not-a-number"),
            ("DATABASE_URL", " "),
        ]);
        let config = SyncConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_pages, 50);
        assert_eq!(config.http_timeout_secs, 20);
        assert_eq!(config.sources_path, PathBuf::from("./sources.yaml"));

        let backoff = config.backoff();
        assert_eq!(backoff.base_delay, Duration::from_millis(100));
        assert_eq!(backoff.max_delay, Duration::from_millis(5000));
    }

    #[test]
    fn registry_parses_defaults_and_selects() {
        let registry = SourceRegistry::from_yaml_str(REGISTRY).unwrap();
        let remotive = registry.get("remotive").unwrap();
        assert!(remotive.enabled);
        assert_eq!(remotive.mode, SourceMode::Live);
        assert_eq!(remotive.keywords, vec!["python", "data engineer"]);

        let all = registry.select(&["all".to_string()]).unwrap();
        assert_eq!(
            all.iter().map(|s| s.source_id.as_str()).collect::<Vec<_>>(),
            vec!["remotive", "hitmarker"]
        );
        let named = registry.select(&["hh".to_string()]).unwrap();
        assert_eq!(named[0].max_pages, Some(5));
        assert!(registry.select(&["indeed".to_string()]).is_err());
    }

    #[test]
    fn registry_rejects_unknown_duplicate_and_incomplete_sources() {
        let unknown = "sources:\n  - source_id: indeed\n    display_name: Indeed\n";
        assert!(SourceRegistry::from_yaml_str(unknown).is_err());

        let twice = "sources:\n  - {source_id: hh, display_name: a}\n  - {source_id: hh, display_name: b}\n";
        assert!(SourceRegistry::from_yaml_str(twice).is_err());

        let no_fixture = "sources:\n  - {source_id: hh, display_name: a, mode: fixture}\n";
        assert!(SourceRegistry::from_yaml_str(no_fixture).is_err());
    }
}

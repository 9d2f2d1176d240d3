#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::warn;

use crate::api::{DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT, MAX_PAGE_SIZE, RetryPolicy};
use crate::credentials::{DEFAULT_GROUP_SIZE, DEFAULT_PER_KEY_CONCURRENCY};
use crate::enrich::{ChannelLookup, EnrichOptions};
use crate::fetcher::{
    DEFAULT_DELAY_MAX_MS, DEFAULT_DELAY_MIN_MS, DEFAULT_TARGET_PER_QUERY, DelayRange, FetchOptions,
};
use crate::orchestrator::CrawlOptions;
use crate::plan::{DEFAULT_QUERIES_PER_BATCH, DurationClass};
use crate::retention::{DEFAULT_MIN_DURATION_SECS, DEFAULT_MIN_VIEWS, RetentionPolicy};
use crate::sink::DEFAULT_OUTPUT_DIR;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PLAN_PATH: &str = "crawl.toml";
pub const DEFAULT_WORKERS: usize = 1;

/// API keys. Never printed in full.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeys(Vec<String>);

impl ApiKeys {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKeys({} configured)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub api_keys: ApiKeys,
    pub group_size: usize,
    pub plan_path: PathBuf,
    pub output_dir: PathBuf,
    pub target_per_query: usize,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub retention: RetentionPolicy,
    pub workers: usize,
    pub per_key_concurrency: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub batch_channels: bool,
    pub api_base: String,
}

impl CrawlSettings {
    pub fn validate(&self) -> Result<()> {
        if self.api_keys.is_empty() {
            bail!("YT_API_KEYS not set");
        }
        if self.group_size == 0 {
            bail!("CRAWL_GROUP_SIZE must be at least 1");
        }
        if self.delay_min_ms > self.delay_max_ms {
            bail!(
                "CRAWL_DELAY_MIN_MS ({}) exceeds CRAWL_DELAY_MAX_MS ({})",
                self.delay_min_ms,
                self.delay_max_ms
            );
        }
        if self.workers == 0 {
            bail!("CRAWL_WORKERS must be at least 1");
        }
        if self.per_key_concurrency == 0 {
            bail!("CRAWL_PER_KEY_CONCURRENCY must be at least 1");
        }
        Ok(())
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            fetch: FetchOptions {
                target_count: self.target_per_query,
                page_size: MAX_PAGE_SIZE,
                delay: DelayRange {
                    min: Duration::from_millis(self.delay_min_ms),
                    max: Duration::from_millis(self.delay_max_ms),
                },
            },
            enrich: EnrichOptions {
                retention: self.retention,
                channel_lookup: if self.batch_channels {
                    ChannelLookup::Batched
                } else {
                    ChannelLookup::PerVideo
                },
                ..EnrichOptions::default()
            },
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            workers: self.workers,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub env_path: Option<PathBuf>,
    pub plan_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub target_per_query: Option<usize>,
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
}

pub fn load_settings() -> Result<CrawlSettings> {
    resolve_settings(SettingsOverrides::default())
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<CrawlSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<CrawlSettings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<CrawlSettings> {
    let api_keys = lookup_value("YT_API_KEYS", file_vars, &env_lookup)
        .map(|raw| ApiKeys::parse(&raw))
        .filter(|keys| !keys.is_empty())
        .ok_or_else(|| anyhow!("YT_API_KEYS not set"))?;
    let plan_path = overrides
        .plan_path
        .or_else(|| lookup_value("CRAWL_PLAN", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAN_PATH));
    let output_dir = overrides
        .output_dir
        .or_else(|| lookup_value("CRAWL_OUTPUT_DIR", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let target_per_query = overrides.target_per_query.unwrap_or_else(|| {
        lookup_parsed(
            "CRAWL_TARGET_PER_QUERY",
            file_vars,
            &env_lookup,
            DEFAULT_TARGET_PER_QUERY,
        )
    });
    let workers = overrides.workers.unwrap_or_else(|| {
        lookup_parsed("CRAWL_WORKERS", file_vars, &env_lookup, DEFAULT_WORKERS)
    });
    let max_retries = overrides
        .max_retries
        .unwrap_or_else(|| lookup_parsed("CRAWL_MAX_RETRIES", file_vars, &env_lookup, 0));

    let settings = CrawlSettings {
        api_keys,
        group_size: lookup_parsed(
            "CRAWL_GROUP_SIZE",
            file_vars,
            &env_lookup,
            DEFAULT_GROUP_SIZE,
        ),
        plan_path,
        output_dir,
        target_per_query,
        delay_min_ms: lookup_parsed(
            "CRAWL_DELAY_MIN_MS",
            file_vars,
            &env_lookup,
            DEFAULT_DELAY_MIN_MS,
        ),
        delay_max_ms: lookup_parsed(
            "CRAWL_DELAY_MAX_MS",
            file_vars,
            &env_lookup,
            DEFAULT_DELAY_MAX_MS,
        ),
        retention: RetentionPolicy {
            min_duration_secs: lookup_parsed(
                "CRAWL_MIN_DURATION_SECS",
                file_vars,
                &env_lookup,
                DEFAULT_MIN_DURATION_SECS,
            ),
            min_views: lookup_parsed("CRAWL_MIN_VIEWS", file_vars, &env_lookup, DEFAULT_MIN_VIEWS),
        },
        workers,
        per_key_concurrency: lookup_parsed(
            "CRAWL_PER_KEY_CONCURRENCY",
            file_vars,
            &env_lookup,
            DEFAULT_PER_KEY_CONCURRENCY,
        ),
        request_timeout: lookup_value("CRAWL_REQUEST_TIMEOUT_SECS", file_vars, &env_lookup)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        max_retries,
        batch_channels: lookup_value("CRAWL_BATCH_CHANNELS", file_vars, &env_lookup)
            .and_then(|value| parse_flag(&value))
            .unwrap_or(true),
        api_base: lookup_value("YT_API_BASE", file_vars, &env_lookup)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
    };
    settings.validate()?;
    Ok(settings)
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    })
}

/// Falls back to `default` when the key is absent or does not parse.
fn lookup_parsed<T: FromStr>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> T {
    match lookup_value(key, file_vars, env_lookup) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable setting; using default");
                default
            }
        },
        None => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Search terms and duration buckets, read from a TOML file:
///
/// ```toml
/// queries = ["Cooking Recipes", "Travel Vlogs"]
/// duration_classes = ["medium", "long"]
/// queries_per_batch = 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    pub queries: Vec<String>,
    #[serde(default = "default_duration_classes")]
    pub duration_classes: Vec<DurationClass>,
    #[serde(default = "default_queries_per_batch")]
    pub queries_per_batch: usize,
}

fn default_duration_classes() -> Vec<DurationClass> {
    DurationClass::DEFAULTS.to_vec()
}

fn default_queries_per_batch() -> usize {
    DEFAULT_QUERIES_PER_BATCH
}

impl PlanFile {
    pub fn parse(raw: &str) -> Result<Self> {
        let plan: PlanFile = toml::from_str(raw).context("parsing crawl plan")?;
        if plan.queries.iter().all(|query| query.trim().is_empty()) {
            bail!("crawl plan lists no queries");
        }
        if plan.duration_classes.is_empty() {
            bail!("crawl plan lists no duration classes");
        }
        if plan.queries_per_batch == 0 {
            bail!("queries_per_batch must be at least 1");
        }
        Ok(plan)
    }
}

pub fn load_plan_file(path: &Path) -> Result<PlanFile> {
    let raw = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    PlanFile::parse(&raw).with_context(|| format!("Loading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> CrawlSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn defaults_apply_when_only_keys_are_set() {
        let settings = settings_from("YT_API_KEYS=\"k1,k2\"\n");
        assert_eq!(settings.api_keys.as_slice(), ["k1", "k2"]);
        assert_eq!(settings.group_size, DEFAULT_GROUP_SIZE);
        assert_eq!(settings.target_per_query, 3000);
        assert_eq!(settings.delay_min_ms, 150);
        assert_eq!(settings.delay_max_ms, 450);
        assert_eq!(settings.retention, RetentionPolicy::default());
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.max_retries, 0);
        assert!(settings.batch_channels);
        assert_eq!(settings.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(settings.plan_path, PathBuf::from(DEFAULT_PLAN_PATH));
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn missing_keys_is_an_error() {
        let vars = read_env_file(make_config("CRAWL_WORKERS=2\n").path()).unwrap();
        let err = build_settings(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("YT_API_KEYS"));
    }

    #[test]
    fn keys_split_on_commas_and_whitespace() {
        let keys = ApiKeys::parse("a, b\nc  d,,");
        assert_eq!(keys.as_slice(), ["a", "b", "c", "d"]);
        assert_eq!(format!("{keys:?}"), "ApiKeys(4 configured)");
    }

    #[test]
    fn env_takes_precedence_over_file() {
        let vars = read_env_file(
            make_config("YT_API_KEYS=\"file-key\"\nCRAWL_MIN_VIEWS=\"10\"\n").path(),
        )
        .unwrap();
        let settings = build_settings(&vars, |key| match key {
            "CRAWL_MIN_VIEWS" => Some("500".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.retention.min_views, 500);
        assert_eq!(settings.api_keys.as_slice(), ["file-key"]);
    }

    #[test]
    fn overrides_take_precedence_over_env() {
        let vars = read_env_file(
            make_config("YT_API_KEYS=k\nCRAWL_WORKERS=3\nCRAWL_OUTPUT_DIR=/file\n").path(),
        )
        .unwrap();
        let settings = build_settings_with_overrides(
            &vars,
            |key| (key == "CRAWL_OUTPUT_DIR").then(|| "/env".to_string()),
            SettingsOverrides {
                workers: Some(8),
                target_per_query: Some(25),
                ..SettingsOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.target_per_query, 25);
        assert_eq!(settings.output_dir, PathBuf::from("/env"));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from("YT_API_KEYS=k\nCRAWL_TARGET_PER_QUERY=lots\n");
        assert_eq!(settings.target_per_query, DEFAULT_TARGET_PER_QUERY);
    }

    #[test]
    fn inverted_delay_bounds_are_rejected() {
        let vars = read_env_file(
            make_config("YT_API_KEYS=k\nCRAWL_DELAY_MIN_MS=500\nCRAWL_DELAY_MAX_MS=100\n").path(),
        )
        .unwrap();
        assert!(build_settings(&vars, |_| None).is_err());
    }

    #[test]
    fn channel_batching_can_be_disabled() {
        let settings = settings_from("YT_API_KEYS=k\nCRAWL_BATCH_CHANNELS=off\n");
        assert!(!settings.batch_channels);
        assert_eq!(
            settings.crawl_options().enrich.channel_lookup,
            ChannelLookup::PerVideo
        );
    }

    #[test]
    fn crawl_options_carry_settings() {
        let settings = settings_from(
            "YT_API_KEYS=k\nCRAWL_DELAY_MIN_MS=10\nCRAWL_DELAY_MAX_MS=20\nCRAWL_MAX_RETRIES=2\n",
        );
        let options = settings.crawl_options();
        assert_eq!(options.fetch.delay.min, Duration::from_millis(10));
        assert_eq!(options.fetch.delay.max, Duration::from_millis(20));
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.fetch.target_count, 3000);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export YT_API_KEYS="a,b"
            CRAWL_PLAN='plans/daily.toml'
            CRAWL_WORKERS =  "2"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("YT_API_KEYS").unwrap(), "a,b");
        assert_eq!(vars.get("CRAWL_PLAN").unwrap(), "plans/daily.toml");
        assert_eq!(vars.get("CRAWL_WORKERS").unwrap(), "2");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn plan_file_applies_defaults() -> Result<()> {
        let plan = PlanFile::parse(r#"queries = ["Cooking Recipes", "Travel Vlogs"]"#)?;
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.duration_classes, DurationClass::DEFAULTS.to_vec());
        assert_eq!(plan.queries_per_batch, 10);
        Ok(())
    }

    #[test]
    fn plan_file_reads_custom_classes() -> Result<()> {
        let file = make_config(
            "queries = [\"DevOps\"]\nduration_classes = [\"long\"]\nqueries_per_batch = 4\n",
        );
        let plan = load_plan_file(file.path())?;
        assert_eq!(plan.duration_classes, vec![DurationClass::Long]);
        assert_eq!(plan.queries_per_batch, 4);
        Ok(())
    }

    #[test]
    fn bundled_plan_parses() -> Result<()> {
        let plan = PlanFile::parse(include_str!("../crawl.toml"))?;
        assert_eq!(plan.queries.len(), 72);
        assert!(plan.queries.iter().any(|query| query == "UI/UX Design"));
        Ok(())
    }

    #[test]
    fn plan_file_rejects_bad_input() {
        assert!(PlanFile::parse("queries = []").is_err());
        assert!(PlanFile::parse("queries = [\"a\"]\nduration_classes = [\"forever\"]").is_err());
        assert!(PlanFile::parse("queries = [\"a\"]\nduration_classes = []").is_err());
        assert!(PlanFile::parse("queries = [\"a\"]\nextra = 1").is_err());
    }
}

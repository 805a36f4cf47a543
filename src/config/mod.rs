//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `TRIAL_HARVEST__` (double underscore
//! separates sections, e.g. `TRIAL_HARVEST__API__PAGE_SIZE=500`).
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! base_url = "https://clinicaltrials.gov/api/v2/studies"
//! page_size = 1000
//! requests_per_second = 5
//!
//! [regions]
//! north_america = ["United States", "Canada"]
//! european_countries = ["France", "Germany"]
//!
//! [cache]
//! enabled = true
//! directory = "~/.cache/trial-harvest"
//!
//! [retry.rate_limit]
//! max_attempts = 5
//! base_delay_ms = 2000
//! multiplier = 2.0
//! max_delay_ms = 60000
//!
//! [pipeline]
//! max_pages = 100
//! concurrency = 4
//! expand_variants = true
//! merge_policy = "last_seen"
//!
//! [input]
//! id_column = "TC Scrape Number"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! file = "logs/app.log"
//! max_files = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

use crate::utils::{BackoffPolicy, MergePolicy};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TRIAL_HARVEST";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub regions: RegionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registry API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Search endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Studies requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Client-side request pacing
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            requests_per_second: default_rps(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://clinicaltrials.gov/api/v2/studies".to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_rps() -> u32 {
    5
}

fn default_timeout() -> u64 {
    30
}

/// Countries that make a trial in-scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(default = "default_north_america")]
    pub north_america: Vec<String>,

    #[serde(default = "default_european_countries")]
    pub european_countries: Vec<String>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            north_america: default_north_america(),
            european_countries: default_european_countries(),
        }
    }
}

impl RegionConfig {
    /// All configured country names
    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.north_america
            .iter()
            .chain(self.european_countries.iter())
            .map(String::as_str)
    }
}

fn default_north_america() -> Vec<String> {
    vec!["United States".to_string(), "Canada".to_string()]
}

fn default_european_countries() -> Vec<String> {
    [
        "Austria",
        "Belgium",
        "Bulgaria",
        "Croatia",
        "Cyprus",
        "Czech Republic",
        "Denmark",
        "Estonia",
        "Finland",
        "France",
        "Germany",
        "Greece",
        "Hungary",
        "Iceland",
        "Ireland",
        "Italy",
        "Latvia",
        "Lithuania",
        "Luxembourg",
        "Malta",
        "Netherlands",
        "Norway",
        "Poland",
        "Portugal",
        "Romania",
        "Slovakia",
        "Slovenia",
        "Spain",
        "Sweden",
        "Switzerland",
        "United Kingdom",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache root; defaults to the platform cache dir
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl CacheConfig {
    /// Resolved cache root
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_dir)
    }
}

fn default_true() -> bool {
    true
}

/// Backoff settings as they appear in configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl BackoffSettings {
    pub fn to_policy(self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Retry policies for the fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Applied when the registry signals rate limiting
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit: BackoffSettings,

    /// Applied to network and server errors
    #[serde(default = "default_transient_backoff")]
    pub transient: BackoffSettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit_backoff(),
            transient: default_transient_backoff(),
        }
    }
}

fn default_rate_limit_backoff() -> BackoffSettings {
    BackoffSettings {
        max_attempts: 5,
        base_delay_ms: 2_000,
        multiplier: 2.0,
        max_delay_ms: 60_000,
    }
}

fn default_transient_backoff() -> BackoffSettings {
    BackoffSettings {
        max_attempts: 3,
        base_delay_ms: 1_000,
        multiplier: 2.0,
        max_delay_ms: 10_000,
    }
}

/// Resolver and aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Page cap per query
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Products processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Also search a punctuation-normalized product name
    #[serde(default = "default_true")]
    pub expand_variants: bool,

    /// Which duplicate wins when the same NCT number is seen twice
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            expand_variants: true,
            merge_policy: MergePolicy::default(),
        }
    }
}

fn default_max_pages() -> usize {
    crate::pipeline::DEFAULT_MAX_PAGES
}

fn default_concurrency() -> usize {
    4
}

/// Workbook reading settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Product id column header; detected per group when unset
    #[serde(default)]
    pub id_column: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` for structured output, anything else for plain text
    #[serde(default)]
    pub format: Option<String>,

    /// Log file path, rotated daily (`logs/app.log` writes `logs/app.<date>.log`)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Rotated log files kept
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
            file: None,
            max_files: default_max_log_files(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }

    /// Open the daily-rotated log file, if one is configured
    pub fn file_appender(&self) -> Result<Option<RollingFileAppender>, InitError> {
        let Some(path) = &self.file else {
            return Ok(None);
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("trial-harvest");

        let mut builder = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(self.max_files.max(1));
        if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
            builder = builder.filename_suffix(ext);
        }
        builder.build(dir).map(Some)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Default cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("trial-harvest"))
        .unwrap_or_else(|| PathBuf::from(".cache/trial-harvest"))
}

/// Look for a config file in the working directory, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("trial-harvest.toml");
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|d| d.join("trial-harvest").join("config.toml"))
        .filter(|p| p.is_file())
}

/// Load configuration from an optional file plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}

/// Render a configuration as TOML
pub fn to_toml(config: &Config) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // Serializes tests that read TRIAL_HARVEST__* variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.page_size, 1000);
        assert_eq!(config.regions.countries().count(), 33);
        assert!(config.cache.enabled);
        assert_eq!(config.pipeline.merge_policy, MergePolicy::LastSeen);
        assert_eq!(config.retry.rate_limit.to_policy().max_attempts, 5);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"
[api]
page_size = 50

[regions]
north_america = ["United States"]
european_countries = []

[retry.rate_limit]
max_attempts = 2
base_delay_ms = 10
multiplier = 3.0
max_delay_ms = 100

[pipeline]
merge_policy = "first_seen"
"#,
        )
        .unwrap();

        let config = {
            let _env = ENV_LOCK.lock().unwrap();
            load_config(Some(&path)).unwrap()
        };
        assert_eq!(config.api.page_size, 50);
        assert_eq!(config.api.base_url, default_base_url());
        assert_eq!(config.regions.countries().collect::<Vec<_>>(), vec!["United States"]);
        assert_eq!(config.retry.rate_limit.max_attempts, 2);
        assert_eq!(config.retry.transient.max_attempts, 3);
        assert_eq!(config.pipeline.merge_policy, MergePolicy::FirstSeen);
        assert_eq!(config.pipeline.concurrency, 4);
    }

    #[test]
    fn test_load_config_from_env() {
        let config = {
            let _env = ENV_LOCK.lock().unwrap();
            std::env::set_var("TRIAL_HARVEST__API__PAGE_SIZE", "500");
            std::env::set_var("TRIAL_HARVEST__PIPELINE__MERGE_POLICY", "first_seen");
            let loaded = load_config(None);
            std::env::remove_var("TRIAL_HARVEST__API__PAGE_SIZE");
            std::env::remove_var("TRIAL_HARVEST__PIPELINE__MERGE_POLICY");
            loaded.unwrap()
        };

        assert_eq!(config.api.page_size, 500);
        assert_eq!(config.api.base_url, default_base_url());
        assert_eq!(config.pipeline.merge_policy, MergePolicy::FirstSeen);
        assert_eq!(config.pipeline.concurrency, 4);
    }

    #[test]
    fn test_log_file_appender() {
        let dir = tempdir().unwrap();
        assert!(LoggingConfig::default().file_appender().unwrap().is_none());

        let logging = LoggingConfig {
            file: Some(dir.path().join("logs").join("app.log")),
            ..Default::default()
        };
        let mut appender = logging.file_appender().unwrap().unwrap();
        appender.write_all(b"run started\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("app."));
        assert!(names[0].ends_with(".log"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Some(Path::new("/nonexistent/trial-harvest.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let rendered = to_toml(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.api.base_url, default_base_url());
        assert_eq!(parsed.regions.european_countries.len(), 31);
    }
}

//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use chrono::Duration;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::DEFAULT_PREFIX;
use crate::cli::Cli;
use crate::reporting::logger::DEFAULT_PENDING_KEY;
use crate::reporting::RetryPolicy;

const LOCAL_CONFIG_BASENAME: &str = "hesab";
const ENV_PREFIX: &str = "HESAB";
const DEFAULT_TTL_MS: i64 = 60 * 60 * 1000;
const DEFAULT_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;
const DEFAULT_ENDPOINT: &str = "http://localhost:3000";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_ENVIRONMENT: &str = "development";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub reporting: ReportingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// `None` means the XDG cache directory
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub prefix: String,
    pub default_ttl: Duration,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct ReportingSettings {
    pub endpoint: String,
    pub retry: RetryPolicy,
    pub pending_key: String,
    pub environment: String,
    pub token: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &Cli) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    reporting: RawReportingSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    prefix: Option<String>,
    default_ttl_ms: Option<i64>,
    max_age_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReportingSettings {
    endpoint: Option<String>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    pending_key: Option<String>,
    environment: Option<String>,
    token: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(dir) = cli.store_dir.as_ref() {
            self.storage.dir = Some(dir.clone());
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(endpoint) = cli.endpoint.as_ref() {
            self.reporting.endpoint = Some(endpoint.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            storage: StorageSettings {
                dir: raw.storage.dir,
            },
            cache: build_cache_settings(raw.cache)?,
            reporting: build_reporting_settings(raw.reporting)?,
            logging: build_logging_settings(raw.logging)?,
        })
    }
}

fn non_negative_millis(key: &'static str, value: Option<i64>, default: i64) -> Result<Duration, LoadError> {
    let millis = value.unwrap_or(default);
    if millis < 0 {
        return Err(LoadError::invalid(key, format!("must not be negative, got {millis}")));
    }
    Ok(Duration::milliseconds(millis))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let prefix = match cache.prefix {
        Some(prefix) if prefix.is_empty() => {
            return Err(LoadError::invalid(
                "cache.prefix",
                "an empty prefix would claim every key in the store",
            ));
        }
        Some(prefix) => prefix,
        None => DEFAULT_PREFIX.to_string(),
    };

    Ok(CacheSettings {
        prefix,
        default_ttl: non_negative_millis("cache.default_ttl_ms", cache.default_ttl_ms, DEFAULT_TTL_MS)?,
        max_age: non_negative_millis("cache.max_age_ms", cache.max_age_ms, DEFAULT_MAX_AGE_MS)?,
    })
}

fn build_reporting_settings(reporting: RawReportingSettings) -> Result<ReportingSettings, LoadError> {
    let max_retries = reporting.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    if max_retries == 0 {
        return Err(LoadError::invalid(
            "reporting.max_retries",
            "at least one delivery attempt is required",
        ));
    }

    let endpoint = non_empty(reporting.endpoint).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(LoadError::invalid(
            "reporting.endpoint",
            format!("expected an http(s) URL, got `{endpoint}`"),
        ));
    }

    Ok(ReportingSettings {
        endpoint,
        retry: RetryPolicy {
            max_retries,
            base_delay: std::time::Duration::from_millis(
                reporting.base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS),
            ),
        },
        pending_key: non_empty(reporting.pending_key)
            .unwrap_or_else(|| DEFAULT_PENDING_KEY.to_string()),
        environment: non_empty(reporting.environment)
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        token: non_empty(reporting.token),
        user_agent: non_empty(reporting.user_agent)
            .unwrap_or_else(|| format!("hesab/{}", env!("CARGO_PKG_VERSION"))),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

/// Built-in defaults with no file, environment or CLI layer applied
#[cfg(test)]
impl Default for Settings {
    fn default() -> Self {
        Self::from_raw(RawSettings::default()).expect("built-in defaults are valid")
    }
}

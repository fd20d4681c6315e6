//! Command-line interface parsing for the hesab operator tool
//!
//! This module handles parsing of CLI arguments using clap: global overrides
//! for the settings layer plus the `cache` and `errors` command groups.

use chrono::Duration;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

use crate::reporting::record::UnknownVariant;
use crate::reporting::{ErrorSource, ErrorStatus, Severity};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A severity, source or status name was not recognized
    #[error("Invalid value: {0}")]
    InvalidVariant(#[from] UnknownVariant),

    /// A `--context` argument was not `key=value`
    #[error("Invalid context: '{0}'. Expected key=value")]
    InvalidContext(String),

    /// A millisecond argument was negative or not a number
    #[error("Invalid duration: '{0}'. Expected a non-negative number of milliseconds")]
    InvalidMillis(String),
}

/// Hesab client tooling - inspect the local cache and the pending error queue
#[derive(Parser, Debug)]
#[command(name = "hesab")]
#[command(about = "Inspect and maintain the Hesab client cache and error queue")]
#[command(version)]
pub struct Cli {
    /// Optional path to a configuration file
    #[arg(long = "config-file", env = "HESAB_CONFIG_FILE", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    /// Directory of the backing store (overrides configuration)
    #[arg(long, value_name = "DIR", global = true)]
    pub store_dir: Option<PathBuf>,

    /// Error collector base URL (overrides configuration)
    #[arg(long, value_name = "URL", global = true)]
    pub endpoint: Option<String>,

    /// Log level for diagnostics on stderr
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Operate on the expiring cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Report errors and manage the pending queue
    #[command(subcommand)]
    Errors(ErrorsCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Print a fresh entry, or `null` when absent or expired
    Get { key: String },
    /// Store a value (parsed as JSON, otherwise kept as a string)
    Set {
        key: String,
        value: String,
        /// Time-to-live in milliseconds (defaults to the configured TTL)
        #[arg(long, value_name = "MS", value_parser = parse_millis_arg)]
        ttl_ms: Option<Duration>,
        /// Tag for bulk invalidation; repeatable
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },
    /// Delete one entry
    Remove { key: String },
    /// Delete every cache entry
    Clear,
    /// Delete expired entries and entries older than the maximum age
    Sweep {
        /// Maximum age in milliseconds (defaults to the configured age)
        #[arg(long, value_name = "MS", value_parser = parse_millis_arg)]
        max_age_ms: Option<Duration>,
    },
    /// Delete every entry carrying a tag
    InvalidateTag { tag: String },
    /// List cached keys
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ErrorsCommand {
    /// Record an error and try to deliver it
    Log {
        message: String,
        #[arg(long, value_parser = parse_severity_arg)]
        severity: Option<Severity>,
        #[arg(long, value_parser = parse_source_arg)]
        source: Option<ErrorSource>,
        /// Tag; repeatable
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Extra context as key=value; repeatable
        #[arg(long = "context", value_name = "KEY=VALUE", value_parser = parse_context_arg)]
        context: Vec<(String, Value)>,
    },
    /// Redeliver queued errors
    Sync,
    /// Print the pending queue
    Pending,
    /// Change the status of a delivered error on the collector
    Status {
        id: String,
        #[arg(value_parser = parse_status_arg)]
        status: ErrorStatus,
    },
}

pub fn parse_severity_arg(s: &str) -> Result<Severity, CliError> {
    Ok(s.parse()?)
}

pub fn parse_source_arg(s: &str) -> Result<ErrorSource, CliError> {
    Ok(s.parse()?)
}

pub fn parse_status_arg(s: &str) -> Result<ErrorStatus, CliError> {
    Ok(s.parse()?)
}

/// Parses `key=value`; the value is read as JSON when possible
pub fn parse_context_arg(s: &str) -> Result<(String, Value), CliError> {
    let (key, value) = s
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| CliError::InvalidContext(s.to_string()))?;
    Ok((key.trim().to_string(), parse_value_arg(value)))
}

pub fn parse_millis_arg(s: &str) -> Result<Duration, CliError> {
    match s.trim().parse::<i64>() {
        Ok(ms) if ms >= 0 => Ok(Duration::milliseconds(ms)),
        _ => Err(CliError::InvalidMillis(s.to_string())),
    }
}

/// JSON if it parses, otherwise the raw string
pub fn parse_value_arg(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}

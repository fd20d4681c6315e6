//! Error record model shared by the logger, the pending queue and the collector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Message used when the caller supplies none
pub const UNKNOWN_MESSAGE: &str = "Unknown error";

/// How bad an error is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Error,
    Critical,
    Debug,
}

/// Where an error originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    #[default]
    Client,
    Server,
    Network,
    Validation,
    Database,
    Authentication,
    Authorization,
    ExternalService,
    Chat,
    Unknown,
}

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    #[default]
    New,
    Pending,
    Retrying,
    Resolved,
    Failed,
    Ignored,
}

/// Generates `as_str`, `Display` and `FromStr` from one name table
macro_rules! wire_names {
    ($ty:ident, $what:literal { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lower = s.trim().to_lowercase();
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == lower)
                    .ok_or_else(|| UnknownVariant {
                        kind: $what,
                        value: s.to_string(),
                    })
            }
        }
    };
}

/// A string that names no variant of a record enum
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

wire_names!(Severity, "severity" {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
    Debug => "debug",
});

wire_names!(ErrorSource, "source" {
    Client => "client",
    Server => "server",
    Network => "network",
    Validation => "validation",
    Database => "database",
    Authentication => "authentication",
    Authorization => "authorization",
    ExternalService => "external_service",
    Chat => "chat",
    Unknown => "unknown",
});

wire_names!(ErrorStatus, "status" {
    New => "new",
    Pending => "pending",
    Retrying => "retrying",
    Resolved => "resolved",
    Failed => "failed",
    Ignored => "ignored",
});

/// A fully populated error record
///
/// Serialized with camelCase keys and RFC 3339 timestamps; this is both the
/// collector's request body and the pending-queue element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source: ErrorSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub status: ErrorStatus,
    #[serde(default)]
    pub retry_count: u32,
    /// Older queue elements may omit this; the logger fills in its policy value
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Environment snapshot overlaid with caller-supplied fields
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related_errors: Vec<String>,
}

/// Caller-supplied fields for a new record; everything else gets a default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewError {
    pub message: Option<String>,
    pub severity: Option<Severity>,
    pub source: Option<ErrorSource>,
    pub stack: Option<String>,
    pub context: Map<String, Value>,
    pub tags: Vec<String>,
    pub related_errors: Vec<String>,
}

impl NewError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Captures the display text and source chain of a Rust error
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut cause = err.source();
        while let Some(inner) = cause {
            chain.push(inner.to_string());
            cause = inner.source();
        }
        Self {
            message: Some(err.to_string()),
            stack: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
            ..Self::default()
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn related(mut self, id: impl Into<String>) -> Self {
        self.related_errors.push(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ErrorRecord {
        ErrorRecord {
            id: "1700000000000-abc".to_string(),
            timestamp: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
            severity: Severity::Critical,
            source: ErrorSource::ExternalService,
            message: "payment gateway timeout".to_string(),
            stack: None,
            status: ErrorStatus::New,
            retry_count: 0,
            max_retries: 3,
            last_retry_at: None,
            resolved_at: None,
            context: Map::new(),
            tags: vec!["payments".to_string()],
            related_errors: Vec::new(),
        }
    }

    #[test]
    fn test_record_wire_format() {
        let value = serde_json::to_value(record()).unwrap();

        assert_eq!(value["timestamp"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(value["severity"], json!("critical"));
        assert_eq!(value["source"], json!("external_service"));
        assert_eq!(value["retryCount"], json!(0));
        assert_eq!(value["maxRetries"], json!(3));
        assert_eq!(value["relatedErrors"], json!([]));
        assert!(value.get("stack").is_none());
        assert!(value.get("lastRetryAt").is_none());
    }

    #[test]
    fn test_record_accepts_minimal_stored_shape() {
        let stored = json!({
            "id": "1-x",
            "timestamp": "2024-03-01T10:00:00.000Z",
            "severity": "warning",
            "source": "network",
            "message": "offline",
            "status": "pending",
            "retryCount": 3,
            "maxRetries": 3
        });

        let parsed: ErrorRecord = serde_json::from_value(stored).unwrap();

        assert_eq!(parsed.severity, Severity::Warning);
        assert_eq!(parsed.status, ErrorStatus::Pending);
        assert!(parsed.context.is_empty());
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(" resolved ".parse::<ErrorStatus>().unwrap(), ErrorStatus::Resolved);
        assert_eq!(
            "external_service".parse::<ErrorSource>().unwrap(),
            ErrorSource::ExternalService
        );
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "fatal".parse::<Severity>().unwrap_err();
        assert_eq!(err.to_string(), "unknown severity: 'fatal'");
    }

    #[test]
    fn test_display_matches_serde_names() {
        for status in ErrorStatus::ALL {
            let serialized = serde_json::to_value(status).unwrap();
            assert_eq!(serialized, json!(status.to_string()));
        }
        for source in ErrorSource::ALL {
            let serialized = serde_json::to_value(source).unwrap();
            assert_eq!(serialized, json!(source.as_str()));
        }
    }

    #[test]
    fn test_new_error_builder() {
        let new = NewError::new("boom")
            .severity(Severity::Info)
            .context("component", "ArticleList")
            .tag("ui")
            .related("1-a");

        assert_eq!(new.message.as_deref(), Some("boom"));
        assert_eq!(new.severity, Some(Severity::Info));
        assert_eq!(new.context["component"], json!("ArticleList"));
        assert_eq!(new.tags, vec!["ui".to_string()]);
        assert_eq!(new.related_errors, vec!["1-a".to_string()]);
        assert!(new.source.is_none());
    }

    #[test]
    fn test_from_error_collects_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let store_err = crate::storage::StoreError::from(io);

        let new = NewError::from_error(&store_err);

        assert_eq!(new.message.as_deref(), Some("store I/O failed: disk full"));
        assert_eq!(new.stack.as_deref(), Some("disk full"));
    }
}

//! Application container and command dispatch
//!
//! `App` is built once per process from [`Settings`]; it owns the single cache
//! and the single error logger and hands them out by reference, so nothing in
//! the crate reaches for a global instance.

use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;

use crate::cache::CacheManager;
use crate::cli::{parse_value_arg, CacheCommand, Command, ErrorsCommand};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::reporting::{
    Collector, EnvironmentProbe, ErrorLogger, HttpCollector, NewError, ReportingError,
};
use crate::shutdown::Shutdown;
use crate::storage::{FileStore, KeyValueStore};

#[derive(Debug, Error)]
pub enum AppError {
    /// No store directory configured and no home directory to derive one
    #[error("cannot determine a store directory; set storage.dir or --store-dir")]
    NoStoreDir,

    #[error(transparent)]
    Reporting(#[from] ReportingError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct App {
    pub cache: CacheManager,
    pub logger: ErrorLogger,
    pub shutdown: Shutdown,
    settings: Settings,
}

impl App {
    /// Builds the file-backed store, the HTTP collector and both services
    pub fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let store: Arc<dyn KeyValueStore> = match settings.storage.dir.as_ref() {
            Some(dir) => Arc::new(FileStore::with_dir(dir.clone())),
            None => Arc::new(FileStore::new().ok_or(AppError::NoStoreDir)?),
        };

        let mut collector = HttpCollector::new(settings.reporting.endpoint.clone())
            .with_token_store(store.clone());
        if let Some(token) = settings.reporting.token.as_ref() {
            collector = collector.with_token(token.clone());
        }

        Ok(Self::with_parts(
            settings,
            store,
            Arc::new(SystemClock),
            Arc::new(collector),
        ))
    }

    /// Wires the services over caller-supplied parts
    pub fn with_parts(
        settings: Settings,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        let shutdown = Shutdown::new();

        let cache = CacheManager::with_clock(store.clone(), clock.clone())
            .with_prefix(settings.cache.prefix.clone());

        let probe = EnvironmentProbe::new(
            settings.reporting.user_agent.clone(),
            settings.reporting.environment.clone(),
            store.clone(),
            clock.clone(),
        );
        let logger = ErrorLogger::new(collector, store, clock, probe)
            .with_policy(settings.reporting.retry)
            .with_pending_key(settings.reporting.pending_key.clone())
            .with_shutdown(shutdown.clone());

        Self {
            cache,
            logger,
            shutdown,
            settings,
        }
    }

    /// Executes one CLI command, printing its result as JSON to `out`
    pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<(), AppError> {
        match command {
            Command::Cache(command) => {
                self.logger.probe().set_route("cache");
                self.run_cache(command, out)
            }
            Command::Errors(command) => {
                self.logger.probe().set_route("errors");
                self.run_errors(command, out).await
            }
        }
    }

    fn run_cache(&self, command: CacheCommand, out: &mut impl Write) -> Result<(), AppError> {
        match command {
            CacheCommand::Get { key } => {
                let entry = self.cache.get_cached_item::<Value>(&key);
                print_json(out, &entry)
            }
            CacheCommand::Set {
                key,
                value,
                ttl_ms,
                tags,
            } => {
                let data = parse_value_arg(&value);
                let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                let ttl = ttl_ms.unwrap_or(self.settings.cache.default_ttl);
                self.cache.set_cached_item(&key, &data, Some(ttl), &tags);
                let stored = self.cache.get_cached_item::<Value>(&key).is_some();
                print_json(out, &json!({ "key": key, "stored": stored }))
            }
            CacheCommand::Remove { key } => {
                self.cache.remove_item(&key);
                print_json(out, &json!({ "removed": key }))
            }
            CacheCommand::Clear => {
                let removed = self.cache.clear_all();
                print_json(out, &json!({ "removed": removed }))
            }
            CacheCommand::Sweep { max_age_ms } => {
                let max_age = max_age_ms.unwrap_or(self.settings.cache.max_age);
                let removed = self.cache.clear_expired(Some(max_age));
                print_json(out, &json!({ "removed": removed }))
            }
            CacheCommand::InvalidateTag { tag } => {
                let removed = self.cache.invalidate_tag(&tag);
                print_json(out, &json!({ "tag": tag, "removed": removed }))
            }
            CacheCommand::List => print_json(out, &self.cache.keys()),
        }
    }

    async fn run_errors(&self, command: ErrorsCommand, out: &mut impl Write) -> Result<(), AppError> {
        match command {
            ErrorsCommand::Log {
                message,
                severity,
                source,
                tags,
                context,
            } => {
                let mut new = NewError::new(message);
                new.severity = severity;
                new.source = source;
                new.tags = tags;
                new.context.extend(context);
                let outcome = self.logger.log_error(new).await;
                print_json(out, &outcome)
            }
            ErrorsCommand::Sync => {
                let report = self.logger.sync_stored_errors().await;
                print_json(out, &report)
            }
            ErrorsCommand::Pending => print_json(out, &self.logger.pending_errors()),
            ErrorsCommand::Status { id, status } => {
                self.logger.update_error_status(&id, status).await?;
                print_json(out, &json!({ "id": id, "status": status }))
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)?;
    writeln!(out, "{json}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::clock::ManualClock;
    use crate::reporting::{DeliveryError, ErrorRecord, ErrorStatus};
    use crate::storage::MemoryStore;
    use clap::Parser;
    use futures::future::{BoxFuture, FutureExt};

    #[derive(Debug)]
    struct OfflineCollector;

    impl Collector for OfflineCollector {
        fn send<'a>(&'a self, _record: &'a ErrorRecord) -> BoxFuture<'a, Result<(), DeliveryError>> {
            async { Err(DeliveryError::Status(reqwest::StatusCode::BAD_GATEWAY)) }.boxed()
        }

        fn update_status<'a>(
            &'a self,
            _id: &'a str,
            _status: ErrorStatus,
        ) -> BoxFuture<'a, Result<(), DeliveryError>> {
            async { Err(DeliveryError::Status(reqwest::StatusCode::BAD_GATEWAY)) }.boxed()
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.reporting.retry.base_delay = std::time::Duration::ZERO;
        settings
    }

    fn create_test_app() -> (App, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let app = App::with_parts(
            test_settings(),
            store.clone(),
            clock.clone(),
            Arc::new(OfflineCollector),
        );
        (app, store, clock)
    }

    async fn run(app: &App, args: &[&str]) -> Result<Value, AppError> {
        let mut argv = vec!["hesab"];
        argv.extend_from_slice(args);
        let cli = Cli::parse_from(argv);
        let mut out = Vec::new();
        app.run(cli.command, &mut out).await?;
        Ok(serde_json::from_slice(&out).expect("command prints JSON"))
    }

    #[tokio::test]
    async fn test_cache_commands_roundtrip() {
        let (app, store, clock) = create_test_app();

        let set = run(&app, &["cache", "set", "user-42", r#"{"name":"Ali"}"#, "--ttl-ms", "1000"])
            .await
            .unwrap();
        assert_eq!(set["stored"], json!(true));

        clock.advance(chrono::Duration::milliseconds(500));
        let hit = run(&app, &["cache", "get", "user-42"]).await.unwrap();
        assert_eq!(hit["data"], json!({"name": "Ali"}));

        clock.advance(chrono::Duration::milliseconds(1000));
        let miss = run(&app, &["cache", "get", "user-42"]).await.unwrap();
        assert_eq!(miss, Value::Null);
        assert!(store.get("cache_user-42").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_list_clear_and_tags() {
        let (app, store, _clock) = create_test_app();
        store.set("pendingErrors", "[]").unwrap();
        run(&app, &["cache", "set", "a", "1", "--tag", "x"]).await.unwrap();
        run(&app, &["cache", "set", "b", "2"]).await.unwrap();

        assert_eq!(run(&app, &["cache", "list"]).await.unwrap(), json!(["a", "b"]));

        let invalidated = run(&app, &["cache", "invalidate-tag", "x"]).await.unwrap();
        assert_eq!(invalidated["removed"], json!(1));

        let cleared = run(&app, &["cache", "clear"]).await.unwrap();
        assert_eq!(cleared["removed"], json!(1));
        assert!(store.get("pendingErrors").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_errors_log_queues_when_offline() {
        let (app, _store, _clock) = create_test_app();

        let outcome = run(&app, &["errors", "log", "offline", "--context", "component=Chat"])
            .await
            .unwrap();
        assert_eq!(outcome["outcome"], json!("queued"));

        let pending = run(&app, &["errors", "pending"]).await.unwrap();
        assert_eq!(pending[0]["message"], json!("offline"));
        assert_eq!(pending[0]["context"]["component"], json!("Chat"));
        assert_eq!(pending[0]["context"]["route"], json!("errors"));

        let report = run(&app, &["errors", "sync"]).await.unwrap();
        assert_eq!(report, json!({"delivered": 0, "remaining": 1}));
    }

    #[tokio::test]
    async fn test_errors_status_failure_propagates() {
        let (app, _store, _clock) = create_test_app();
        let result = run(&app, &["errors", "status", "1-a", "resolved"]).await;
        assert!(matches!(result, Err(AppError::Reporting(_))));
    }
}

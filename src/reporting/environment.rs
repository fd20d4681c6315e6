//! Environment snapshot attached to every error record

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};

use crate::clock::Clock;
use crate::storage::KeyValueStore;

/// Store key holding the signed-in user's id
pub const USER_ID_KEY: &str = "userId";

/// Device class guessed from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let lower = user_agent.to_lowercase();
        if lower.contains("mobile") {
            DeviceType::Mobile
        } else if lower.contains("tablet") {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    browser: &'a str,
    os: &'static str,
    device_type: DeviceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    timestamp: String,
    environment: &'a str,
}

/// Captures the process environment for error context
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    user_agent: String,
    environment: String,
    route: Arc<RwLock<Option<String>>>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl EnvironmentProbe {
    pub fn new(
        user_agent: impl Into<String>,
        environment: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            environment: environment.into(),
            route: Arc::new(RwLock::new(None)),
            store,
            clock,
        }
    }

    /// Records the route or command currently being served
    pub fn set_route(&self, route: impl Into<String>) {
        *self.route.write().unwrap_or_else(|p| p.into_inner()) = Some(route.into());
    }

    /// Builds the snapshot, then overlays `extra` (caller fields win)
    pub fn capture(&self, extra: &Map<String, Value>) -> Map<String, Value> {
        let user_id = match self.store.get(USER_ID_KEY) {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(err) => {
                tracing::debug!(error = %err, "user id unavailable for error context");
                None
            }
        };

        let snapshot = Snapshot {
            browser: &self.user_agent,
            os: std::env::consts::OS,
            device_type: DeviceType::from_user_agent(&self.user_agent),
            route: self.route.read().unwrap_or_else(|p| p.into_inner()).clone(),
            user_id,
            timestamp: self.clock.now().to_rfc3339(),
            environment: &self.environment,
        };

        let mut context = match serde_json::to_value(snapshot) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        context.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }
}

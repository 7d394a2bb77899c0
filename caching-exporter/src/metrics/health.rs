//! Health tracking.
//!
//! Each data source reports the outcome of its latest refresh; the `/health`
//! endpoint aggregates them.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Component names reported by the exporter.
pub const CONFIG_STORE: &str = "config_store";
pub const LIVE_STATE: &str = "live_state";
pub const ENGINE_SNAPSHOT: &str = "engine_snapshot";

/// Health status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Latest refresh succeeded.
    Healthy,
    /// Latest refresh failed; the last published values are stale.
    Degraded,
    /// Component has not reported yet.
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health information for a single component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last report time (RFC 3339).
    pub last_check: String,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            last_check: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            last_check: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Overall exporter health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub components: HashMap<String, ComponentHealth>,
}

impl SystemHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Latest health report per component.
#[derive(Debug)]
pub struct HealthRegistry {
    components: RwLock<HashMap<String, ComponentHealth>>,
    start_time: Instant,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, name: &str, health: ComponentHealth) {
        self.components.write().insert(name.to_string(), health);
    }

    pub fn record_healthy(&self, name: &str) {
        self.record(name, ComponentHealth::healthy());
    }

    pub fn record_degraded(&self, name: &str, message: impl Into<String>) {
        self.record(name, ComponentHealth::degraded(message));
    }

    /// Aggregate status: unknown until something reports, degraded if any
    /// component is degraded.
    pub fn snapshot(&self) -> SystemHealth {
        let components = self.components.read().clone();

        let status = if components.is_empty() {
            HealthStatus::Unknown
        } else if components
            .values()
            .any(|c| c.status == HealthStatus::Degraded)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        SystemHealth {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

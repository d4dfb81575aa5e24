//! Health reporting for the poller process.
//!
//! The process is live only while the poll loop is `Running` and every registered component
//! (the poll loop itself, the rdkafka client) reported healthy before its deadline. Once the
//! poller leaves `Running` it never comes back, so the probe keeps failing until the process
//! is restarted by its supervisor.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Lifecycle of the poll loop: `Init -> Running -> ShuttingDown -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Init,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(DateTime<Utc>),
    /// Automatically set when the HealthyUntil deadline is reached
    Stalled,
}

#[derive(Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub state: PollerState,
    pub components: HashMap<String, ComponentStatus>,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state={:?} components={:?}", self.state, self.components)
    }
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = self.to_string();
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug)]
struct Inner {
    state: PollerState,
    components: HashMap<String, ComponentStatus>,
}

#[derive(Clone)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: PollerState::Init,
                components: HashMap::new(),
            })),
        }
    }

    /// Registers a component that must report healthy at least once every `deadline`.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            registry: self.clone(),
        };
        handle.set(ComponentStatus::Starting);
        handle
    }

    pub fn set_state(&self, state: PollerState) {
        match self.inner.write() {
            Ok(mut inner) => inner.state = state,
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }

    pub fn state(&self) -> PollerState {
        self.inner
            .read()
            .map(|inner| inner.state)
            .unwrap_or(PollerState::Stopped)
    }

    /// Overall status, computed at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> HealthStatus {
        let Ok(inner) = self.inner.read() else {
            // Poisoned lock: report unhealthy and let the process be restarted
            return HealthStatus {
                healthy: false,
                state: PollerState::Stopped,
                components: HashMap::new(),
            };
        };

        let mut healthy = inner.state == PollerState::Running && !inner.components.is_empty();
        let components = inner
            .components
            .iter()
            .map(|(name, status)| {
                let status = match status {
                    ComponentStatus::HealthyUntil(until) if *until > now => *status,
                    ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                    other => *other,
                };
                if !matches!(status, ComponentStatus::HealthyUntil(_)) {
                    healthy = false;
                }
                (name.clone(), status)
            })
            .collect();

        HealthStatus {
            healthy,
            state: inner.state,
            components,
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let status = self.status_at(Utc::now());
        if !status.healthy {
            warn!("liveness check failed: {}", status);
        }
        status
    }
}

pub struct HealthHandle {
    component: String,
    deadline: Duration,
    registry: HealthRegistry,
}

impl HealthHandle {
    /// Report healthy until `deadline` from now. Safe to call from rdkafka's threads.
    pub fn report_healthy(&self) {
        self.set(ComponentStatus::HealthyUntil(Utc::now() + self.deadline));
    }

    fn set(&self, status: ComponentStatus) {
        match self.registry.inner.write() {
            Ok(mut inner) => {
                _ = inner.components.insert(self.component.clone(), status);
            }
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

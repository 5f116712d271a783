use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tracing::warn;

/// Liveness of the background loops the import service depends on.
///
/// The process is healthy when every registered component reported healthy
/// recently. A component that misses its deadline is reported as stalled.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more often than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(err) => warn!("failed to report health status: {}", err),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let components: HashMap<String, ComponentStatus> = match self.components.read() {
            Ok(components) => components
                .iter()
                .map(|(name, status)| {
                    let status = match status {
                        ComponentStatus::HealthyUntil(until) if *until <= now => {
                            ComponentStatus::Stalled
                        }
                        other => other.clone(),
                    };
                    (name.clone(), status)
                })
                .collect(),
            Err(err) => {
                warn!("{} registry is poisoned: {}", self.name, err);
                return HealthStatus::default();
            }
        };

        let healthy = !components.is_empty()
            && components
                .values()
                .all(|s| matches!(s, ComponentStatus::HealthyUntil(_)));
        if !healthy {
            warn!("{} health check failed: {:?}", self.name, components);
        }

        HealthStatus {
            healthy,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_once_all_components_report() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);

        let one = registry.register("one".to_string(), Duration::from_secs(30));
        let two = registry.register("two".to_string(), Duration::from_secs(30));
        assert!(!registry.get_status().healthy);

        one.report_healthy();
        assert!(!registry.get_status().healthy);
        two.report_healthy();
        assert!(registry.get_status().healthy);

        two.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("forwarder".to_string(), Duration::ZERO);
        handle.report_healthy();

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("forwarder"),
            Some(&ComponentStatus::Stalled)
        );
    }
}

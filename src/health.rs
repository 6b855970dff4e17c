//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Run the component checks and fold them into one status document.
pub async fn check(pool: Option<&sqlx::PgPool>) -> HealthStatus {
    let mut checks = HashMap::new();

    if let Some(pool) = pool {
        let start = Instant::now();
        let result = timeout(
            Duration::from_secs(5),
            crate::store::health_check(pool),
        )
        .await;
        let component = match result {
            Ok(Ok(())) => ComponentHealth::up(Some(start.elapsed().as_millis())),
            Ok(Err(e)) => ComponentHealth::down(Some(e.to_string())),
            Err(_) => ComponentHealth::down(Some("health check timed out".to_string())),
        };
        checks.insert("database".to_string(), component);
    }

    let status = if checks
        .values()
        .all(|c| c.status == ComponentState::Up)
    {
        HealthState::Healthy
    } else {
        HealthState::Unhealthy
    };

    HealthStatus {
        status,
        checks,
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_with_no_components_is_healthy() {
        let status = check(None).await;
        assert_eq!(status.status, HealthState::Healthy);
        assert!(status.checks.is_empty());
    }
}

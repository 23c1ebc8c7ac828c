//! Health check module
//! Provides health status for the application and its dependencies

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::repository::PaymentStore;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
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
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details,
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

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn PaymentStore>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let backend = self.store.backend();
        let start = Instant::now();

        let component = match timeout(STORE_CHECK_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                info!(backend, elapsed_ms = elapsed as u64, "Store health check: OK");
                ComponentHealth::up(Some(elapsed), Some(backend.to_string()))
            }
            Ok(Err(e)) => {
                error!(backend, error = %e, "Store health check failed");
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!(backend, "Store health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };

        if component.status == ComponentState::Down {
            health_status.status = HealthState::Unhealthy;
        }
        health_status
            .checks
            .insert("database".to_string(), component);

        health_status
    }
}

pub async fn health(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

pub async fn readiness(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    if status.is_healthy() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "checks": status.checks })),
        )
    }
}

pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

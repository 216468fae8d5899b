use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::ports::Store;
use crate::services::PaymentOrchestrator;

/// Dependencies whose failure makes the service unhealthy rather than degraded.
const CRITICAL_DEPENDENCIES: [&str; 1] = ["store"];

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> DependencyStatus;
}

pub struct StoreChecker {
    store: Arc<dyn Store>,
}

impl StoreChecker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for StoreChecker {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.store.ping().await {
            Ok(()) => DependencyStatus::Healthy {
                status: "healthy".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: e.to_string(),
            },
        }
    }
}

/// Reports the payment gateway circuit breaker without calling the gateway.
pub struct GatewayChecker {
    payments: PaymentOrchestrator,
}

impl GatewayChecker {
    pub fn new(payments: PaymentOrchestrator) -> Self {
        Self { payments }
    }
}

#[async_trait]
impl DependencyChecker for GatewayChecker {
    fn name(&self) -> &'static str {
        "payment_gateway"
    }

    async fn check(&self) -> DependencyStatus {
        match self.payments.gateway_circuit_state().as_str() {
            "open" => DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: "circuit breaker open".to_string(),
            },
            state => DependencyStatus::Healthy {
                status: state.to_string(),
                latency_ms: 0,
            },
        }
    }
}

pub async fn check_health(
    checkers: &[&dyn DependencyChecker],
    start_time: Instant,
) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);

    let results = futures::future::join_all(
        checkers
            .iter()
            .map(|checker| timeout(timeout_duration, checker.check())),
    )
    .await;

    let dependencies: HashMap<String, DependencyStatus> = checkers
        .iter()
        .zip(results)
        .map(|(checker, result)| {
            let status = result.unwrap_or_else(|_| DependencyStatus::Unhealthy {
                status: "unhealthy".to_string(),
                error: "timeout".to_string(),
            });
            (checker.name().to_string(), status)
        })
        .collect();

    HealthResponse {
        status: determine_overall_status(&dependencies),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

fn determine_overall_status(dependencies: &HashMap<String, DependencyStatus>) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if CRITICAL_DEPENDENCIES.contains(&name.as_str()) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, bool);

    #[async_trait]
    impl DependencyChecker for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn check(&self) -> DependencyStatus {
            if self.1 {
                DependencyStatus::Healthy {
                    status: "healthy".to_string(),
                    latency_ms: 1,
                }
            } else {
                DependencyStatus::Unhealthy {
                    status: "unhealthy".to_string(),
                    error: "down".to_string(),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let store = Fixed("store", true);
        let gateway = Fixed("payment_gateway", true);
        let health = check_health(&[&store, &gateway], Instant::now()).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn test_gateway_failure_degrades() {
        let store = Fixed("store", true);
        let gateway = Fixed("payment_gateway", false);
        let health = check_health(&[&store, &gateway], Instant::now()).await;
        assert_eq!(health.status, "degraded");
    }

    #[tokio::test]
    async fn test_store_failure_is_unhealthy() {
        let store = Fixed("store", false);
        let gateway = Fixed("payment_gateway", true);
        let health = check_health(&[&store, &gateway], Instant::now()).await;
        assert_eq!(health.status, "unhealthy");
    }

    #[test]
    fn test_dependency_status_serialization() {
        let healthy = DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: 42,
        };
        let json = serde_json::to_value(&healthy).unwrap();
        assert_eq!(json["latency_ms"], 42);
        assert!(json.get("error").is_none());

        let unhealthy = DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: "timeout".to_string(),
        };
        let json = serde_json::to_value(&unhealthy).unwrap();
        assert_eq!(json["error"], "timeout");
        assert!(json.get("latency_ms").is_none());
    }
}

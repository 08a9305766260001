//! Health tracking for the buffer agent
//!
//! The reconcile loop records every finished pass into a [`HealthRegistry`].
//! Liveness is derived from the two components below. Readiness follows the
//! last successful buffer report and explains itself with the last failure.

use crate::error::{FailureKind, ReconcileError};
use crate::reconciler::BufferReport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    /// Priority class and deployment writes
    pub const RECONCILER: &str = "reconciler";
    /// Node inventory reads and buffer sizing
    pub const SIZING: &str = "sizing";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but not yet for long enough to restart the agent
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_failure: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    fn failing(status: ComponentStatus, err: &ReconcileError, message: String) -> Self {
        Self {
            status,
            message: Some(message),
            last_failure: Some(err.kind()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// The buffer as the last successful pass left it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastSuccess {
    pub node: String,
    pub size_gi: i64,
    /// Whether that pass had to write to the cluster
    pub wrote: bool,
    pub timestamp: i64,
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<LastSuccess>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gi: Option<i64>,
}

#[derive(Debug)]
struct State {
    components: BTreeMap<String, ComponentHealth>,
    last_success: Option<LastSuccess>,
    last_failure: Option<(FailureKind, String)>,
}

impl State {
    fn overall(&self) -> ComponentStatus {
        let statuses = self.components.values().map(|c| c.status);
        statuses.fold(ComponentStatus::Healthy, |worst, status| {
            match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            }
        })
    }
}

/// Shared health state of the reconcile loop
///
/// Both components start healthy; the agent is not ready until a pass
/// succeeds.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        let components = [components::RECONCILER, components::SIZING]
            .into_iter()
            .map(|name| (name.to_string(), ComponentHealth::healthy()))
            .collect();

        Self {
            state: Arc::new(RwLock::new(State {
                components,
                last_success: None,
                last_failure: None,
            })),
        }
    }

    /// Record a pass that converged the buffer
    pub async fn record_success(&self, report: &BufferReport) {
        let mut state = self.state.write().await;
        for health in state.components.values_mut() {
            *health = ComponentHealth::healthy();
        }
        state.last_success = Some(LastSuccess {
            node: report.size.node.clone(),
            size_gi: report.size.size_gi,
            wrote: report.wrote(),
            timestamp: chrono::Utc::now().timestamp(),
        });
        state.last_failure = None;
    }

    /// Record a failed pass
    ///
    /// Sizing failures degrade `sizing`, other failures degrade
    /// `reconciler`. Once `consecutive` reaches `unhealthy_after` the
    /// reconciler is unhealthy. A cancelled pass leaves the components
    /// untouched and is only remembered as the last failure.
    pub async fn record_failure(
        &self,
        err: &ReconcileError,
        consecutive: u32,
        unhealthy_after: u32,
    ) {
        let mut state = self.state.write().await;
        let kind = err.kind();
        state.last_failure = Some((kind, err.to_string()));

        let (name, health) = match kind {
            FailureKind::Cancelled => return,
            _ if consecutive >= unhealthy_after => {
                let message =
                    format!("{} consecutive reconciliations failed: {}", consecutive, err);
                let health = ComponentHealth::failing(ComponentStatus::Unhealthy, err, message);
                (components::RECONCILER, health)
            }
            FailureKind::Sizing => (
                components::SIZING,
                ComponentHealth::failing(ComponentStatus::Degraded, err, err.to_string()),
            ),
            FailureKind::Cluster => (
                components::RECONCILER,
                ComponentHealth::failing(ComponentStatus::Degraded, err, err.to_string()),
            ),
        };
        state.components.insert(name.to_string(), health);
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.overall(),
            components: state.components.clone(),
            last_success: state.last_success.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let last_failure = state.last_failure.as_ref().map(|(kind, _)| *kind);
        let size_gi = state.last_success.as_ref().map(|s| s.size_gi);

        let reason = match (&state.last_success, &state.last_failure) {
            (None, None) => Some("No reconciliation has finished yet".to_string()),
            (None, Some((kind, message))) => Some(format!(
                "No reconciliation has succeeded yet; last pass failed ({}): {}",
                kind, message
            )),
            (Some(_), _) if state.overall() == ComponentStatus::Unhealthy => {
                let message = state.last_failure.as_ref().map(|(_, m)| m.as_str());
                Some(format!("Reconciliation is failing: {}", message.unwrap_or("unknown")))
            }
            (Some(_), _) => None,
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
            last_failure,
            size_gi,
        }
    }
}

//! Autoscaling buffer reconciliation
//!
//! This crate provides the core functionality for:
//! - Sizing the buffer from the cluster's worker nodes
//! - Converging the buffer priority class and deployment
//! - Health checks and observability for the reconcile loop

pub mod cluster;
pub mod context;
pub mod error;
pub mod health;
pub mod observability;
pub mod reconciler;
pub mod sizing;
pub mod template;

pub use cluster::{ClusterClient, ClusterError, KubeCluster, NodeInventory, ObjectKey, ObjectStore};
pub use context::ReconcileContext;
pub use error::{FailureKind, ReconcileError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, LastSuccess,
    ReadinessResponse,
};
pub use observability::{BufferMetrics, ReconcileLogger};
pub use reconciler::{
    ensure_buffer, inspect_buffer, BufferReport, BufferStatus, Convergence, ObjectState,
};
pub use sizing::{BufferSize, SizingError};

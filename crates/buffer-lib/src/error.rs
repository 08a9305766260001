//! Reconciliation errors

use crate::cluster::{ClusterError, ObjectKey};
use crate::sizing::SizingError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Coarse class of a failed pass, as reported by health and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No buffer size could be derived from the node inventory
    Sizing,
    /// A cluster call failed or timed out
    Cluster,
    /// The pass was cancelled before it finished
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Sizing => "sizing",
            FailureKind::Cluster => "cluster",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that fail a reconciliation pass
///
/// Conflicts never show up here: they are retried and, past the retry
/// bound, reported as an abandoned outcome instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A cluster call for one object failed
    #[error("failed to reconcile {kind} {key}: {source}")]
    Cluster {
        kind: &'static str,
        key: ObjectKey,
        #[source]
        source: ClusterError,
    },

    /// Listing the node inventory failed
    #[error("failed to list nodes: {0}")]
    Inventory(#[source] ClusterError),

    /// The buffer could not be sized from the node inventory
    #[error(transparent)]
    Sizing(#[from] SizingError),
}

impl ReconcileError {
    pub fn kind(&self) -> FailureKind {
        if self.is_cancelled() {
            FailureKind::Cancelled
        } else if self.is_sizing() {
            FailureKind::Sizing
        } else {
            FailureKind::Cluster
        }
    }

    /// Whether the error was raised because no buffer size could be derived
    pub fn is_sizing(&self) -> bool {
        matches!(self, ReconcileError::Sizing(_))
    }

    /// Whether the pass stopped because its context was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReconcileError::Cluster {
                source: ClusterError::Cancelled,
                ..
            } | ReconcileError::Inventory(ClusterError::Cancelled)
        )
    }
}

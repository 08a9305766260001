//! Cluster object store boundary
//!
//! The reconciler never talks to the API server directly. It goes through
//! the [`ObjectStore`] and [`NodeInventory`] traits so the same code runs
//! against a live cluster ([`KubeCluster`]) and against the in-memory store
//! used by tests.

mod live;
#[cfg(any(test, feature = "testing"))]
mod memory;

pub use live::KubeCluster;
#[cfg(any(test, feature = "testing"))]
pub use memory::{node_fixture, FailurePoint, InMemoryCluster};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use std::fmt;
use thiserror::Error;

pub use async_trait::async_trait;

/// Errors returned by cluster calls, classified the way the reconciler
/// reacts to them
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// The object changed since it was read (or already exists on create)
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Any other API or transport failure
    #[error("cluster API error: {0}")]
    Api(String),

    /// The call did not finish within the per-call deadline
    #[error("cluster call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The caller cancelled the reconciliation
    #[error("cluster call cancelled")]
    Cancelled,
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

/// Name and optional namespace identifying one object of a kind
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub name: String,
    pub namespace: Option<String>,
}

impl ObjectKey {
    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Read and write access to one kind of object
///
/// `update` must be an optimistic-concurrency write: it carries the
/// resource version of the object it was given and fails with
/// [`ClusterError::Conflict`] if the stored object has moved on.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Fetch an object, `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, ClusterError>;

    /// Create an object, failing with a conflict if it already exists
    async fn create(&self, obj: &K) -> Result<K, ClusterError>;

    /// Replace an object at the resource version it was read at
    async fn update(&self, obj: &K) -> Result<K, ClusterError>;
}

/// Read access to the node inventory
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// List all nodes in inventory order
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;
}

/// Everything the buffer reconciler needs from a cluster
pub trait ClusterClient:
    ObjectStore<PriorityClass> + ObjectStore<Deployment> + NodeInventory
{
}

impl<T> ClusterClient for T where
    T: ObjectStore<PriorityClass> + ObjectStore<Deployment> + NodeInventory
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::cluster("pc").to_string(), "pc");
        assert_eq!(
            ObjectKey::namespaced("member", "buffer").to_string(),
            "member/buffer"
        );
    }

    #[test]
    fn test_cluster_error_classification() {
        assert!(ClusterError::Conflict("x".into()).is_conflict());
        assert!(!ClusterError::Api("x".into()).is_conflict());
        assert!(ClusterError::NotFound("x".into()).is_not_found());
    }
}

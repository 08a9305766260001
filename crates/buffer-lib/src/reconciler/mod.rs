//! Buffer reconciliation
//!
//! [`ensure_buffer`] is the entry point. It converges the priority class
//! first and the buffer deployment second, since the deployment refers to
//! the priority class by name. A failure on the priority class skips the
//! deployment step.

mod converge;


pub use converge::{converge, Convergence, MAX_CONFLICT_RETRIES};

use crate::cluster::{ClusterClient, ClusterError, NodeInventory, ObjectKey, ObjectStore};
use crate::context::ReconcileContext;
use crate::error::ReconcileError;
use crate::sizing::{self, BufferSize};
use crate::template;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use serde::Serialize;
use tracing::{debug, info};

const PRIORITY_CLASS_KIND: &str = "PriorityClass";
const DEPLOYMENT_KIND: &str = "Deployment";

/// Outcome of one full reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferReport {
    pub namespace: String,
    pub priority_class: Convergence,
    pub deployment: Convergence,
    pub size: BufferSize,
}

impl BufferReport {
    /// Whether the pass wrote to the cluster
    pub fn wrote(&self) -> bool {
        self.priority_class.wrote() || self.deployment.wrote()
    }

    pub fn conflicts(&self) -> u32 {
        self.priority_class.conflicts() + self.deployment.conflicts()
    }
}

/// Observed state of one buffer object relative to its desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Missing,
    InSync,
    Drifted,
}

impl ObjectState {
    fn of<K>(observed: Option<K>, patch: impl FnOnce(&mut K) -> bool) -> Self {
        match observed {
            None => ObjectState::Missing,
            Some(mut obj) => {
                if patch(&mut obj) {
                    ObjectState::Drifted
                } else {
                    ObjectState::InSync
                }
            }
        }
    }
}

/// Read-only view of the buffer objects, for inspection
#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    pub namespace: String,
    pub priority_class: ObjectState,
    pub deployment: ObjectState,
    /// Size the deployment currently requests
    pub requested_size_gi: Option<i64>,
    /// Size a reconciliation would set now
    pub desired_size: BufferSize,
}

fn cluster_error(
    kind: &'static str,
    key: ObjectKey,
) -> impl FnOnce(ClusterError) -> ReconcileError {
    move |source| ReconcileError::Cluster { kind, key, source }
}

/// Ensure the buffer priority class and deployment exist in `namespace`
/// and match the desired state for the current node inventory
pub async fn ensure_buffer(
    client: &dyn ClusterClient,
    namespace: &str,
    ctx: &ReconcileContext,
) -> Result<BufferReport, ReconcileError> {
    let priority_class = ensure_priority_class(client, ctx).await?;
    let (deployment, size) = ensure_buffer_deployment(client, namespace, ctx).await?;

    Ok(BufferReport {
        namespace: namespace.to_string(),
        priority_class,
        deployment,
        size,
    })
}

/// Converge the cluster-wide buffer priority class
pub async fn ensure_priority_class<C>(
    client: &C,
    ctx: &ReconcileContext,
) -> Result<Convergence, ReconcileError>
where
    C: ObjectStore<PriorityClass> + ?Sized,
{
    let key = ObjectKey::cluster(template::PRIORITY_CLASS_NAME);
    let outcome = converge(
        client,
        ctx,
        PRIORITY_CLASS_KIND,
        &key,
        template::priority_class,
        template::patch_priority_class,
    )
    .await
    .map_err(cluster_error(PRIORITY_CLASS_KIND, key.clone()))?;

    log_outcome(PRIORITY_CLASS_KIND, &key, outcome);
    Ok(outcome)
}

/// Size the buffer from a fresh read of the node inventory
pub async fn compute_buffer_size<C>(
    client: &C,
    ctx: &ReconcileContext,
) -> Result<BufferSize, ReconcileError>
where
    C: NodeInventory + ?Sized,
{
    let nodes = ctx
        .call(client.list_nodes())
        .await
        .map_err(ReconcileError::Inventory)?;
    let size = sizing::buffer_size(&nodes)?;

    debug!(
        node = %size.node,
        allocatable_gi = size.allocatable_gi,
        size_gi = size.size_gi,
        "Computed buffer size"
    );
    Ok(size)
}

/// Converge the buffer deployment in `namespace`
///
/// The size is recomputed on every call; a sizing failure returns before
/// the deployment is read or written.
pub async fn ensure_buffer_deployment<C>(
    client: &C,
    namespace: &str,
    ctx: &ReconcileContext,
) -> Result<(Convergence, BufferSize), ReconcileError>
where
    C: ObjectStore<Deployment> + NodeInventory + ?Sized,
{
    let size = compute_buffer_size(client, ctx).await?;
    let size_gi = size.size_gi;

    let key = ObjectKey::namespaced(namespace, template::BUFFER_APP_NAME);
    let outcome = converge(
        client,
        ctx,
        DEPLOYMENT_KIND,
        &key,
        || template::buffer_deployment(namespace, size_gi),
        |dt: &mut Deployment| template::patch_buffer_deployment(dt, size_gi),
    )
    .await
    .map_err(cluster_error(DEPLOYMENT_KIND, key.clone()))?;

    log_outcome(DEPLOYMENT_KIND, &key, outcome);
    Ok((outcome, size))
}

/// Compare the buffer objects against their desired state without writing
pub async fn inspect_buffer(
    client: &dyn ClusterClient,
    namespace: &str,
    ctx: &ReconcileContext,
) -> Result<BufferStatus, ReconcileError> {
    let pc_key = ObjectKey::cluster(template::PRIORITY_CLASS_NAME);
    let pc: Option<PriorityClass> = ctx
        .call(ObjectStore::<PriorityClass>::get(client, &pc_key))
        .await
        .map_err(cluster_error(PRIORITY_CLASS_KIND, pc_key))?;

    let desired_size = compute_buffer_size(client, ctx).await?;
    let size_gi = desired_size.size_gi;

    let dt_key = ObjectKey::namespaced(namespace, template::BUFFER_APP_NAME);
    let dt: Option<Deployment> = ctx
        .call(ObjectStore::<Deployment>::get(client, &dt_key))
        .await
        .map_err(cluster_error(DEPLOYMENT_KIND, dt_key))?;
    let requested_size_gi = dt.as_ref().and_then(template::requested_size_gi);

    Ok(BufferStatus {
        namespace: namespace.to_string(),
        priority_class: ObjectState::of(pc, template::patch_priority_class),
        deployment: ObjectState::of(dt, |dt| template::patch_buffer_deployment(dt, size_gi)),
        requested_size_gi,
        desired_size,
    })
}

fn log_outcome(kind: &'static str, key: &ObjectKey, outcome: Convergence) {
    match outcome {
        Convergence::Unchanged => debug!(kind, key = %key, "Object already up to date"),
        Convergence::Abandoned { .. } => {}
        _ => info!(kind, key = %key, outcome = %outcome, "Object reconciled"),
    }
}

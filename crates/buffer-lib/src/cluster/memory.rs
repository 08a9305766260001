//! In-memory cluster for tests
//!
//! Behaves like the API server for the calls the reconciler makes: every
//! stored object carries a resource version, `update` rejects stale
//! versions with a conflict and `create` rejects existing objects. Tests can
//! schedule a concurrent writer that mutates an object right before the next
//! updates, inject API failures, and slow every call down.

use super::{async_trait, ClusterError, NodeInventory, ObjectKey, ObjectStore};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, NodeStatus};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Mutation<K> = Arc<dyn Fn(&mut K) + Send + Sync>;

/// Call sites where a failure can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    PriorityClassGet,
    PriorityClassWrite,
    DeploymentGet,
    DeploymentWrite,
    ListNodes,
}

/// Objects of one kind plus write accounting
struct Table<K> {
    objects: BTreeMap<ObjectKey, K>,
    interference: Option<(usize, Mutation<K>)>,
    create_race: Option<K>,
    delete_before_update: bool,
    creates: usize,
    updates: usize,
    conflicts: usize,
}

impl<K> Default for Table<K> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            interference: None,
            create_race: None,
            delete_before_update: false,
            creates: 0,
            updates: 0,
            conflicts: 0,
        }
    }
}

#[derive(Default)]
struct State {
    priority_classes: Table<PriorityClass>,
    deployments: Table<Deployment>,
    nodes: Vec<Node>,
    node_lists: usize,
    next_version: u64,
    failures: HashSet<FailurePoint>,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Fake cluster keeping objects in memory
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster whose node inventory is `nodes`, in that order
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        let cluster = Self::new();
        cluster.set_nodes(nodes);
        cluster
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.lock().nodes = nodes;
    }

    /// Make every call at `point` fail with an API error
    pub fn fail_at(&self, point: FailurePoint) {
        self.lock().failures.insert(point);
    }

    /// Store a priority class directly, bypassing write accounting
    pub fn seed_priority_class(&self, mut pc: PriorityClass) {
        let mut state = self.lock();
        pc.metadata.resource_version = Some(state.bump_version());
        let key = ObjectKey::cluster(pc.metadata.name.clone().unwrap_or_default());
        state.priority_classes.objects.insert(key, pc);
    }

    /// Store a deployment directly, bypassing write accounting
    pub fn seed_deployment(&self, mut dt: Deployment) {
        let mut state = self.lock();
        dt.metadata.resource_version = Some(state.bump_version());
        let key = ObjectKey::namespaced(
            dt.metadata.namespace.clone().unwrap_or_default(),
            dt.metadata.name.clone().unwrap_or_default(),
        );
        state.deployments.objects.insert(key, dt);
    }

    /// Before each of the next `times` priority class updates, apply
    /// `mutate` to the stored object as another writer would
    pub fn interfere_with_priority_class(
        &self,
        times: usize,
        mutate: impl Fn(&mut PriorityClass) + Send + Sync + 'static,
    ) {
        self.lock().priority_classes.interference = Some((times, Arc::new(mutate)));
    }

    /// Before each of the next `times` deployment updates, apply `mutate`
    /// to the stored object as another writer would
    pub fn interfere_with_deployment(
        &self,
        times: usize,
        mutate: impl Fn(&mut Deployment) + Send + Sync + 'static,
    ) {
        self.lock().deployments.interference = Some((times, Arc::new(mutate)));
    }

    /// Have another writer create `pc` right before our next create
    pub fn race_priority_class_create(&self, pc: PriorityClass) {
        self.lock().priority_classes.create_race = Some(pc);
    }

    /// Have another writer create `dt` right before our next create
    pub fn race_deployment_create(&self, dt: Deployment) {
        self.lock().deployments.create_race = Some(dt);
    }

    /// Have another writer delete the stored priority class right before
    /// our next update
    pub fn delete_priority_class_before_update(&self) {
        self.lock().priority_classes.delete_before_update = true;
    }

    /// Have another writer delete the stored deployment right before our
    /// next update
    pub fn delete_deployment_before_update(&self) {
        self.lock().deployments.delete_before_update = true;
    }

    pub fn priority_class(&self, name: &str) -> Option<PriorityClass> {
        self.lock()
            .priority_classes
            .objects
            .get(&ObjectKey::cluster(name))
            .cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock()
            .deployments
            .objects
            .get(&ObjectKey::namespaced(namespace, name))
            .cloned()
    }

    /// Successful creates and updates of priority classes
    pub fn priority_class_writes(&self) -> usize {
        let state = self.lock();
        state.priority_classes.creates + state.priority_classes.updates
    }

    /// Successful creates and updates of deployments
    pub fn deployment_writes(&self) -> usize {
        let state = self.lock();
        state.deployments.creates + state.deployments.updates
    }

    /// All successful writes
    pub fn writes(&self) -> usize {
        self.priority_class_writes() + self.deployment_writes()
    }

    /// Writes rejected with a conflict, across kinds
    pub fn conflicts(&self) -> usize {
        let state = self.lock();
        state.priority_classes.conflicts + state.deployments.conflicts
    }

    pub fn node_lists(&self) -> usize {
        self.lock().node_lists
    }
}

fn injected(point: FailurePoint) -> ClusterError {
    ClusterError::Api(format!("injected failure at {:?}", point))
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    let meta = obj.meta();
    ObjectKey {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone(),
    }
}

fn table_get<K: Clone>(table: &Table<K>, key: &ObjectKey) -> Option<K> {
    table.objects.get(key).cloned()
}

fn table_create<K: Resource + Clone>(
    table: &mut Table<K>,
    obj: &K,
    mut next_version: impl FnMut() -> String,
) -> Result<K, ClusterError> {
    if let Some(mut winner) = table.create_race.take() {
        winner.meta_mut().resource_version = Some(next_version());
        table.objects.insert(key_of(&winner), winner);
    }

    let key = key_of(obj);
    if table.objects.contains_key(&key) {
        table.conflicts += 1;
        return Err(ClusterError::Conflict(format!("{} already exists", key)));
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(next_version());
    table.objects.insert(key, stored.clone());
    table.creates += 1;
    Ok(stored)
}

fn table_update<K: Resource + Clone>(
    table: &mut Table<K>,
    obj: &K,
    mut next_version: impl FnMut() -> String,
) -> Result<K, ClusterError> {
    let key = key_of(obj);
    let interference = match table.interference.as_mut() {
        Some((remaining, mutate)) if *remaining > 0 => {
            *remaining -= 1;
            Some(mutate.clone())
        }
        _ => None,
    };

    if std::mem::take(&mut table.delete_before_update) {
        table.objects.remove(&key);
    }

    let stored = table
        .objects
        .get_mut(&key)
        .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;

    if let Some(mutate) = interference {
        mutate(stored);
        stored.meta_mut().resource_version = Some(next_version());
    }

    if stored.meta().resource_version != obj.meta().resource_version {
        table.conflicts += 1;
        return Err(ClusterError::Conflict(format!(
            "{} was modified, please apply your changes to the latest version",
            key
        )));
    }

    let mut updated = obj.clone();
    updated.meta_mut().resource_version = Some(next_version());
    *stored = updated.clone();
    table.updates += 1;
    Ok(updated)
}

#[async_trait]
impl ObjectStore<PriorityClass> for InMemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<PriorityClass>, ClusterError> {
        self.delay().await;
        let state = self.lock();
        if state.failures.contains(&FailurePoint::PriorityClassGet) {
            return Err(injected(FailurePoint::PriorityClassGet));
        }
        Ok(table_get(&state.priority_classes, key))
    }

    async fn create(&self, obj: &PriorityClass) -> Result<PriorityClass, ClusterError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failures.contains(&FailurePoint::PriorityClassWrite) {
            return Err(injected(FailurePoint::PriorityClassWrite));
        }
        let counter = &mut state.next_version;
        table_create(&mut state.priority_classes, obj, || {
            *counter += 1;
            counter.to_string()
        })
    }

    async fn update(&self, obj: &PriorityClass) -> Result<PriorityClass, ClusterError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failures.contains(&FailurePoint::PriorityClassWrite) {
            return Err(injected(FailurePoint::PriorityClassWrite));
        }
        let counter = &mut state.next_version;
        table_update(&mut state.priority_classes, obj, || {
            *counter += 1;
            counter.to_string()
        })
    }
}

#[async_trait]
impl ObjectStore<Deployment> for InMemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Deployment>, ClusterError> {
        self.delay().await;
        let state = self.lock();
        if state.failures.contains(&FailurePoint::DeploymentGet) {
            return Err(injected(FailurePoint::DeploymentGet));
        }
        Ok(table_get(&state.deployments, key))
    }

    async fn create(&self, obj: &Deployment) -> Result<Deployment, ClusterError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failures.contains(&FailurePoint::DeploymentWrite) {
            return Err(injected(FailurePoint::DeploymentWrite));
        }
        let counter = &mut state.next_version;
        table_create(&mut state.deployments, obj, || {
            *counter += 1;
            counter.to_string()
        })
    }

    async fn update(&self, obj: &Deployment) -> Result<Deployment, ClusterError> {
        self.delay().await;
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failures.contains(&FailurePoint::DeploymentWrite) {
            return Err(injected(FailurePoint::DeploymentWrite));
        }
        let counter = &mut state.next_version;
        table_update(&mut state.deployments, obj, || {
            *counter += 1;
            counter.to_string()
        })
    }
}

#[async_trait]
impl NodeInventory for InMemoryCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.delay().await;
        let mut state = self.lock();
        if state.failures.contains(&FailurePoint::ListNodes) {
            return Err(injected(FailurePoint::ListNodes));
        }
        state.node_lists += 1;
        Ok(state.nodes.clone())
    }
}

/// Build a node carrying the given role labels and allocatable memory
///
/// Roles are short names such as `"worker"` or `"infra"` and become
/// `node-role.kubernetes.io/<role>` labels.
pub fn node_fixture(name: &str, roles: &[&str], allocatable_memory: Option<&str>) -> Node {
    let labels = roles
        .iter()
        .map(|role| (format!("node-role.kubernetes.io/{}", role), String::new()))
        .collect::<BTreeMap<_, _>>();

    let allocatable = allocatable_memory.map(|memory| {
        let mut allocatable = BTreeMap::new();
        allocatable.insert("cpu".to_string(), Quantity("4".to_string()));
        allocatable.insert("memory".to_string(), Quantity(memory.to_string()));
        allocatable
    });

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(NodeStatus {
            allocatable,
            ..Default::default()
        }),
        ..Default::default()
    }
}

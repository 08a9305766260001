//! Live cluster access through the Kubernetes API server

use super::{async_trait, ClusterError, NodeInventory, ObjectKey, ObjectStore};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::debug;

/// Object store backed by a `kube` client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Api(format!("failed to build client: {}", e)))?;
        Ok(Self::new(client))
    }

    fn deployments(&self, namespace: Option<&str>) -> Result<Api<Deployment>, ClusterError> {
        let namespace = namespace
            .ok_or_else(|| ClusterError::Api("deployment has no namespace".to_string()))?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

/// Map a `kube` error onto the classes the reconciler distinguishes
fn classify(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict(resp.message),
        other => ClusterError::Api(other.to_string()),
    }
}

fn object_name(name: Option<&String>) -> Result<&str, ClusterError> {
    name.map(String::as_str)
        .ok_or_else(|| ClusterError::Api("object has no name".to_string()))
}

#[async_trait]
impl ObjectStore<PriorityClass> for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<PriorityClass>, ClusterError> {
        debug!(kind = "PriorityClass", key = %key, "Fetching object");
        let api: Api<PriorityClass> = Api::all(self.client.clone());
        api.get_opt(&key.name).await.map_err(classify)
    }

    async fn create(&self, obj: &PriorityClass) -> Result<PriorityClass, ClusterError> {
        let api: Api<PriorityClass> = Api::all(self.client.clone());
        api.create(&PostParams::default(), obj)
            .await
            .map_err(classify)
    }

    async fn update(&self, obj: &PriorityClass) -> Result<PriorityClass, ClusterError> {
        let api: Api<PriorityClass> = Api::all(self.client.clone());
        let name = object_name(obj.metadata.name.as_ref())?;
        api.replace(name, &PostParams::default(), obj)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl ObjectStore<Deployment> for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Deployment>, ClusterError> {
        debug!(kind = "Deployment", key = %key, "Fetching object");
        let api = self.deployments(key.namespace.as_deref())?;
        api.get_opt(&key.name).await.map_err(classify)
    }

    async fn create(&self, obj: &Deployment) -> Result<Deployment, ClusterError> {
        let api = self.deployments(obj.metadata.namespace.as_deref())?;
        api.create(&PostParams::default(), obj)
            .await
            .map_err(classify)
    }

    async fn update(&self, obj: &Deployment) -> Result<Deployment, ClusterError> {
        let api = self.deployments(obj.metadata.namespace.as_deref())?;
        let name = object_name(obj.metadata.name.as_ref())?;
        api.replace(name, &PostParams::default(), obj)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl NodeInventory for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await.map_err(classify)?;
        debug!(count = nodes.items.len(), "Listed nodes");
        Ok(nodes.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} happened", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_classify_conflict() {
        let err = classify(api_error(409, "Conflict"));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(api_error(404, "NotFound"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_other_api_errors() {
        let err = classify(api_error(403, "Forbidden"));
        assert!(matches!(err, ClusterError::Api(_)));
    }
}

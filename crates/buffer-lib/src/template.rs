//! Desired state of the buffer objects
//!
//! The priority class and the deployment are a fixed manifest parameterised
//! only by namespace and buffer size:
//!
//! ```yaml
//! kind: Deployment
//! apiVersion: apps/v1
//! metadata:
//!   name: autoscaling-buffer
//!   namespace: ${NAMESPACE}
//!   labels:
//!     app: autoscaling-buffer
//! spec:
//!   replicas: 1
//!   selector:
//!     matchLabels:
//!       app: autoscaling-buffer
//!   template:
//!     metadata:
//!       labels:
//!         app: autoscaling-buffer
//!     spec:
//!       priorityClassName: autoscaling-buffer
//!       terminationGracePeriodSeconds: 0
//!       containers:
//!       - name: autoscaling-buffer
//!         image: gcr.io/google_containers/pause-amd64:3.0
//!         resources:
//!           requests:
//!             memory: ${MEMORY}
//!           limits:
//!             memory: ${MEMORY}
//! ```
//!
//! The `patch_*` functions bring an observed object in line with that
//! manifest in place and report whether anything changed, so an object that
//! is already correct never produces a write.

use crate::sizing::{gibibytes, parse_quantity};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

pub const PRIORITY_CLASS_NAME: &str = "autoscaling-buffer";
pub const BUFFER_APP_NAME: &str = "autoscaling-buffer";

/// Below the default priority (0) of ordinary workloads
pub const BUFFER_PRIORITY: i32 = -100;
pub const PRIORITY_CLASS_DESCRIPTION: &str =
    "This priority class is to be used by the autoscaling buffer pod only";

pub const BUFFER_IMAGE: &str = "gcr.io/google_containers/pause-amd64:3.0";
pub const BUFFER_REPLICAS: i32 = 1;
pub const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 0;

pub const APP_LABEL_KEY: &str = "app";
pub const PROVIDER_LABEL_KEY: &str = "toolchain.dev.openshift.com/provider";
pub const PROVIDER_LABEL_VALUE: &str = "codeready-toolchain";

const MEMORY: &str = "memory";

/// Memory quantity for a buffer of `size_gi` gibibytes
pub fn memory_quantity(size_gi: i64) -> Quantity {
    Quantity(format!("{}Gi", size_gi))
}

/// Desired priority class, built from scratch
pub fn priority_class() -> PriorityClass {
    let mut pc = PriorityClass {
        metadata: ObjectMeta {
            name: Some(PRIORITY_CLASS_NAME.to_string()),
            ..Default::default()
        },
        global_default: Some(false),
        ..Default::default()
    };
    patch_priority_class(&mut pc);
    pc
}

/// Desired buffer deployment, built from scratch
pub fn buffer_deployment(namespace: &str, size_gi: i64) -> Deployment {
    let mut dt = Deployment {
        metadata: ObjectMeta {
            name: Some(BUFFER_APP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    patch_buffer_deployment(&mut dt, size_gi);
    dt
}

/// Set `key=value` in `labels`, returns true if it changed
pub fn patch_labels(
    labels: &mut Option<BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> bool {
    let labels = labels.get_or_insert_with(BTreeMap::new);
    if labels.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    labels.insert(key.to_string(), value.to_string());
    true
}

/// Bring a priority class in line with the desired state
pub fn patch_priority_class(pc: &mut PriorityClass) -> bool {
    let mut updated = patch_labels(
        &mut pc.metadata.labels,
        PROVIDER_LABEL_KEY,
        PROVIDER_LABEL_VALUE,
    );
    if pc.value != BUFFER_PRIORITY {
        pc.value = BUFFER_PRIORITY;
        updated = true;
    }
    // The API server omits a false flag, so only an explicit true is drift
    if pc.global_default == Some(true) {
        pc.global_default = Some(false);
        updated = true;
    }
    if pc.description.as_deref() != Some(PRIORITY_CLASS_DESCRIPTION) {
        pc.description = Some(PRIORITY_CLASS_DESCRIPTION.to_string());
        updated = true;
    }
    updated
}

fn selector_matches(selector: &LabelSelector) -> bool {
    let labels_match = selector.match_labels.as_ref().is_some_and(|labels| {
        labels.len() == 1 && labels.get(APP_LABEL_KEY).map(String::as_str) == Some(BUFFER_APP_NAME)
    });
    let no_expressions = selector
        .match_expressions
        .as_ref()
        .map_or(true, |exprs| exprs.is_empty());
    labels_match && no_expressions
}

fn desired_selector() -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(
            APP_LABEL_KEY.to_string(),
            BUFFER_APP_NAME.to_string(),
        )])),
        match_expressions: None,
    }
}

/// Set memory in a request or limit map, comparing by value
fn patch_memory(
    resources: &mut Option<BTreeMap<String, Quantity>>,
    desired_bytes: f64,
    size_gi: i64,
) -> bool {
    let resources = resources.get_or_insert_with(BTreeMap::new);
    let current = resources.get(MEMORY).and_then(|q| parse_quantity(&q.0).ok());
    if current == Some(desired_bytes) {
        return false;
    }
    resources.insert(MEMORY.to_string(), memory_quantity(size_gi));
    true
}

fn patch_container(container: &mut Container, size_gi: i64) -> bool {
    let mut updated = false;
    if container.image.as_deref() != Some(BUFFER_IMAGE) {
        container.image = Some(BUFFER_IMAGE.to_string());
        updated = true;
    }

    let desired_bytes = gibibytes(size_gi);
    let resources = container
        .resources
        .get_or_insert_with(ResourceRequirements::default);
    updated = patch_memory(&mut resources.requests, desired_bytes, size_gi) || updated;
    updated = patch_memory(&mut resources.limits, desired_bytes, size_gi) || updated;
    updated
}

fn patch_pod_spec(spec: &mut PodSpec, size_gi: i64) -> bool {
    let mut updated = false;
    if spec.priority_class_name.as_deref() != Some(PRIORITY_CLASS_NAME) {
        spec.priority_class_name = Some(PRIORITY_CLASS_NAME.to_string());
        updated = true;
    }
    if spec.termination_grace_period_seconds != Some(TERMINATION_GRACE_PERIOD_SECONDS) {
        spec.termination_grace_period_seconds = Some(TERMINATION_GRACE_PERIOD_SECONDS);
        updated = true;
    }

    match spec.containers.iter_mut().find(|c| c.name == BUFFER_APP_NAME) {
        Some(container) => patch_container(container, size_gi) || updated,
        None => {
            let mut container = Container {
                name: BUFFER_APP_NAME.to_string(),
                ..Default::default()
            };
            patch_container(&mut container, size_gi);
            spec.containers = vec![container];
            true
        }
    }
}

/// Bring a buffer deployment in line with the desired state for `size_gi`
pub fn patch_buffer_deployment(dt: &mut Deployment, size_gi: i64) -> bool {
    let mut updated = patch_labels(
        &mut dt.metadata.labels,
        PROVIDER_LABEL_KEY,
        PROVIDER_LABEL_VALUE,
    );
    updated = patch_labels(&mut dt.metadata.labels, APP_LABEL_KEY, BUFFER_APP_NAME) || updated;

    let spec = dt.spec.get_or_insert_with(DeploymentSpec::default);
    if spec.replicas != Some(BUFFER_REPLICAS) {
        spec.replicas = Some(BUFFER_REPLICAS);
        updated = true;
    }
    if !selector_matches(&spec.selector) {
        spec.selector = desired_selector();
        updated = true;
    }

    let template = &mut spec.template;
    let template_meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    updated = patch_labels(&mut template_meta.labels, APP_LABEL_KEY, BUFFER_APP_NAME) || updated;

    let pod_spec = template.spec.get_or_insert_with(PodSpec::default);
    patch_pod_spec(pod_spec, size_gi) || updated
}

/// Buffer size the deployment currently requests, in whole gibibytes
pub fn requested_size_gi(dt: &Deployment) -> Option<i64> {
    let spec = dt.spec.as_ref()?.template.spec.as_ref()?;
    let container = spec.containers.iter().find(|c| c.name == BUFFER_APP_NAME)?;
    let memory = container.resources.as_ref()?.requests.as_ref()?.get(MEMORY)?;
    let bytes = parse_quantity(&memory.0).ok()?;
    Some((bytes / gibibytes(1)).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodTemplateSpec;

    fn pod_template(dt: &Deployment) -> &PodTemplateSpec {
        &dt.spec.as_ref().unwrap().template
    }

    #[test]
    fn test_priority_class_template() {
        let pc = priority_class();
        assert_eq!(pc.metadata.name.as_deref(), Some(PRIORITY_CLASS_NAME));
        assert_eq!(pc.value, -100);
        assert_eq!(pc.global_default, Some(false));
        assert_eq!(pc.description.as_deref(), Some(PRIORITY_CLASS_DESCRIPTION));
        assert_eq!(
            pc.metadata.labels.unwrap()[PROVIDER_LABEL_KEY],
            PROVIDER_LABEL_VALUE
        );
    }

    #[test]
    fn test_priority_class_template_is_stable() {
        let mut pc = priority_class();
        assert!(!patch_priority_class(&mut pc));
        assert_eq!(pc, priority_class());
    }

    #[test]
    fn test_patch_priority_class_fixes_drift() {
        let mut pc = priority_class();
        pc.value = 1000;
        pc.global_default = Some(true);
        pc.description = Some("hijacked".to_string());
        pc.metadata.labels = None;

        assert!(patch_priority_class(&mut pc));
        assert_eq!(pc, priority_class());
    }

    #[test]
    fn test_patch_priority_class_unset_global_default_is_not_drift() {
        let mut pc = priority_class();
        pc.global_default = None;
        assert!(!patch_priority_class(&mut pc));
    }

    #[test]
    fn test_patch_labels_preserves_others() {
        let mut labels = Some(BTreeMap::from([("team".to_string(), "x".to_string())]));
        assert!(patch_labels(&mut labels, "app", "buffer"));
        assert!(!patch_labels(&mut labels, "app", "buffer"));
        let labels = labels.unwrap();
        assert_eq!(labels["team"], "x");
        assert_eq!(labels["app"], "buffer");
    }

    #[test]
    fn test_deployment_template() {
        let dt = buffer_deployment("member-operator", 12);
        assert_eq!(dt.metadata.name.as_deref(), Some(BUFFER_APP_NAME));
        assert_eq!(dt.metadata.namespace.as_deref(), Some("member-operator"));

        let labels = dt.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[APP_LABEL_KEY], BUFFER_APP_NAME);
        assert_eq!(labels[PROVIDER_LABEL_KEY], PROVIDER_LABEL_VALUE);

        let spec = dt.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.selector, desired_selector());

        let template = pod_template(&dt);
        assert_eq!(
            template.metadata.as_ref().unwrap().labels.as_ref().unwrap()[APP_LABEL_KEY],
            BUFFER_APP_NAME
        );

        let pod = template.spec.as_ref().unwrap();
        assert_eq!(pod.priority_class_name.as_deref(), Some(PRIORITY_CLASS_NAME));
        assert_eq!(pod.termination_grace_period_seconds, Some(0));
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.name, BUFFER_APP_NAME);
        assert_eq!(container.image.as_deref(), Some(BUFFER_IMAGE));
        let resources = container.resources.as_ref().unwrap();
        assert_eq!(resources.requests.as_ref().unwrap()["memory"], memory_quantity(12));
        assert_eq!(resources.limits.as_ref().unwrap()["memory"], memory_quantity(12));
        assert_eq!(requested_size_gi(&dt), Some(12));
    }

    #[test]
    fn test_deployment_template_is_stable() {
        let mut dt = buffer_deployment("ns", 8);
        assert!(!patch_buffer_deployment(&mut dt, 8));
    }

    #[test]
    fn test_equivalent_memory_notation_is_not_drift() {
        let mut dt = buffer_deployment("ns", 8);
        let pod = dt.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        let resources = pod.containers[0].resources.as_mut().unwrap();
        resources
            .requests
            .as_mut()
            .unwrap()
            .insert("memory".to_string(), Quantity("8589934592".to_string()));

        assert!(!patch_buffer_deployment(&mut dt, 8));
    }

    #[test]
    fn test_patch_deployment_resizes_memory() {
        let mut dt = buffer_deployment("ns", 8);
        assert!(patch_buffer_deployment(&mut dt, 12));
        assert_eq!(dt, buffer_deployment("ns", 12));
    }

    #[test]
    fn test_patch_deployment_fixes_drift() {
        let mut dt = buffer_deployment("ns", 8);
        dt.metadata.labels = Some(BTreeMap::from([(
            "app".to_string(),
            "something-else".to_string(),
        )]));
        let spec = dt.spec.as_mut().unwrap();
        spec.replicas = Some(3);
        spec.selector = LabelSelector {
            match_labels: Some(BTreeMap::from([
                ("app".to_string(), BUFFER_APP_NAME.to_string()),
                ("tier".to_string(), "extra".to_string()),
            ])),
            match_expressions: None,
        };
        let pod = spec.template.spec.as_mut().unwrap();
        pod.priority_class_name = None;
        pod.termination_grace_period_seconds = Some(30);
        pod.containers[0].image = Some("busybox".to_string());

        assert!(patch_buffer_deployment(&mut dt, 8));
        assert_eq!(dt, buffer_deployment("ns", 8));
    }

    #[test]
    fn test_patch_deployment_keeps_unrelated_resources() {
        let mut dt = buffer_deployment("ns", 8);
        let pod = dt.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        let requests = pod.containers[0]
            .resources
            .as_mut()
            .unwrap()
            .requests
            .as_mut()
            .unwrap();
        requests.insert("cpu".to_string(), Quantity("10m".to_string()));

        assert!(patch_buffer_deployment(&mut dt, 10));

        let pod = dt.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let requests = pod.containers[0]
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests["cpu"], Quantity("10m".to_string()));
        assert_eq!(requests["memory"], memory_quantity(10));
    }

    #[test]
    fn test_patch_deployment_replaces_foreign_containers() {
        let mut dt = buffer_deployment("ns", 8);
        let pod = dt.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        pod.containers = vec![Container {
            name: "intruder".to_string(),
            image: Some("nginx".to_string()),
            ..Default::default()
        }];

        assert!(patch_buffer_deployment(&mut dt, 8));
        assert_eq!(dt, buffer_deployment("ns", 8));
    }

    #[test]
    fn test_consistent_selector_is_left_alone() {
        let mut dt = buffer_deployment("ns", 8);
        dt.spec.as_mut().unwrap().replicas = Some(0);
        let selector_before = dt.spec.as_ref().unwrap().selector.clone();

        assert!(patch_buffer_deployment(&mut dt, 8));
        assert_eq!(dt.spec.as_ref().unwrap().selector, selector_before);
    }
}

//! Lifecycle control for running workflows.
//!
//! Like logs, control has an engine-native and a cluster-native path,
//! chosen once from configuration:
//! - engine: the engine's retry and stop endpoints
//! - cluster: a shutdown patch for stop, a resubmission for retry
//!
//! The cluster-native retry creates a new workflow (new name, new uid)
//! from the failed run's spec rather than resuming it in place.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::adapters::{ArgoServerClient, RawResource, ResourceClient, ResourceKind};
use crate::config::ClientConfig;
use crate::core::submission::{
    CLUSTER_TEMPLATE_LABEL, MANAGED_BY_LABEL, MANAGER, TEMPLATE_LABEL,
};
use crate::core::transform::workflow_from_raw;
use crate::domain::Workflow;
use crate::error::{ClientError, Result};

/// Label linking a resubmitted workflow to the run it replaces
pub const RESUBMITTED_FROM_LABEL: &str = "workflows.argoproj.io/resubmitted-from-workflow";
/// Prefix of labels the engine's controller owns
const CONTROLLER_LABEL_PREFIX: &str = "workflows.argoproj.io/";

/// Retry and stop operations on existing workflows
#[async_trait]
pub trait WorkflowControl: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rerun a failed workflow, returning the workflow that will run
    async fn retry(&self, namespace: &str, name: &str) -> Result<Workflow>;

    /// Stop a running workflow
    async fn stop(&self, namespace: &str, name: &str) -> Result<Workflow>;
}

/// Control through the engine's HTTP API
pub struct EngineControl {
    engine: ArgoServerClient,
}

impl EngineControl {
    pub fn new(engine: ArgoServerClient) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl WorkflowControl for EngineControl {
    fn name(&self) -> &'static str {
        "engine"
    }

    async fn retry(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let raw = self.engine.retry(namespace, name).await?;
        workflow_from_raw(&raw)
    }

    async fn stop(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let raw = self.engine.stop(namespace, name).await?;
        workflow_from_raw(&raw)
    }
}

/// Control through the control plane alone
pub struct ClusterControl {
    resources: Arc<dyn ResourceClient>,
}

impl ClusterControl {
    pub fn new(resources: Arc<dyn ResourceClient>) -> Self {
        Self { resources }
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<(RawResource, Workflow)> {
        let raw = self
            .resources
            .get(&ResourceKind::WORKFLOW, namespace, name)
            .await?;
        let workflow = workflow_from_raw(&raw)?;
        Ok((raw, workflow))
    }
}

#[async_trait]
impl WorkflowControl for ClusterControl {
    fn name(&self) -> &'static str {
        "cluster"
    }

    #[instrument(skip(self))]
    async fn retry(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let (raw, original) = self.fetch(namespace, name).await?;
        if !original.phase().is_unsuccessful() {
            return Err(ClientError::InvalidInput(format!(
                "Workflow '{}' is {}; only Failed or Error workflows can be retried",
                name,
                original.phase()
            )));
        }

        let body = resubmission_body(&raw, name, namespace);
        let created = self
            .resources
            .create(&ResourceKind::WORKFLOW, namespace, &body)
            .await?;
        let workflow = workflow_from_raw(&created)?;

        info!(
            original = name,
            workflow = %workflow.name(),
            "Workflow resubmitted"
        );
        Ok(workflow)
    }

    #[instrument(skip(self))]
    async fn stop(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let (_, current) = self.fetch(namespace, name).await?;
        if current.phase().is_completed() {
            return Err(ClientError::InvalidInput(format!(
                "Workflow '{}' already finished with phase {}",
                name,
                current.phase()
            )));
        }

        let patch = json!({ "spec": { "shutdown": "Stop" } });
        let patched = self
            .resources
            .patch(&ResourceKind::WORKFLOW, namespace, name, &patch)
            .await?;

        info!(name, "Workflow stop requested");
        workflow_from_raw(&patched)
    }
}

/// New workflow document repeating a finished run
fn resubmission_body(raw: &RawResource, name: &str, namespace: &str) -> Value {
    let mut spec = raw
        .get("spec")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    spec.remove("shutdown");
    spec.remove("suspend");

    let mut labels: Map<String, Value> = raw
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter(|(k, _)| !k.starts_with(CONTROLLER_LABEL_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    // Template origin survives the controller-label filter
    for key in [TEMPLATE_LABEL, CLUSTER_TEMPLATE_LABEL] {
        if let Some(value) = raw.pointer("/metadata/labels").and_then(|l| l.get(key)) {
            labels.insert(key.to_string(), value.clone());
        }
    }
    labels.insert(RESUBMITTED_FROM_LABEL.to_string(), json!(name));
    labels.insert(MANAGED_BY_LABEL.to_string(), json!(MANAGER));

    json!({
        "apiVersion": ResourceKind::WORKFLOW.api_version(),
        "kind": ResourceKind::WORKFLOW.kind,
        "metadata": {
            "generateName": format!("{}-", name),
            "namespace": namespace,
            "labels": labels,
        },
        "spec": spec,
    })
}

/// Pick the control strategy for a configuration
pub fn control_for(
    config: &ClientConfig,
    resources: Arc<dyn ResourceClient>,
    engine: Option<ArgoServerClient>,
) -> Arc<dyn WorkflowControl> {
    match engine {
        Some(engine) if config.uses_engine() => Arc::new(EngineControl::new(engine)),
        _ => Arc::new(ClusterControl::new(resources)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resubmission_body() {
        let raw = json!({
            "metadata": {
                "name": "build-x7k2p",
                "uid": "abc",
                "resourceVersion": "991",
                "labels": {
                    "workflows.argoproj.io/completed": "true",
                    "workflows.argoproj.io/phase": "Failed",
                    "workflows.argoproj.io/workflow-template": "build-template",
                    "team": "ci"
                }
            },
            "spec": {
                "entrypoint": "main",
                "shutdown": "Stop",
                "arguments": {"parameters": [{"name": "branch", "value": "dev"}]}
            },
            "status": {"phase": "Failed"}
        });

        let body = resubmission_body(&raw, "build-x7k2p", "ci");
        let labels = body["metadata"]["labels"].as_object().unwrap();

        assert_eq!(body["metadata"]["generateName"], "build-x7k2p-");
        assert!(body["metadata"].get("uid").is_none());
        assert!(body["metadata"].get("resourceVersion").is_none());
        assert!(body.get("status").is_none());
        assert!(body["spec"].get("shutdown").is_none());
        assert_eq!(body["spec"]["arguments"], raw["spec"]["arguments"]);

        assert_eq!(labels["team"], "ci");
        assert_eq!(labels[TEMPLATE_LABEL], "build-template");
        assert_eq!(labels[RESUBMITTED_FROM_LABEL], "build-x7k2p");
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGER);
        assert!(!labels.contains_key("workflows.argoproj.io/completed"));
        assert!(!labels.contains_key("workflows.argoproj.io/phase"));
    }
}

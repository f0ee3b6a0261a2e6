//! Shared fixtures for integration tests.
//!
//! `StubResourceClient` is an in-memory control plane: it stores documents,
//! emulates `generateName`, records every call and can be told to fail,
//! stall or panic.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use flowbridge::adapters::{
    ArgoServerClient, LabelSelector, RawResource, ResourceClient, ResourceKind,
};
use flowbridge::{ClientConfig, ClientError, Result, WorkflowService};

pub const NAMESPACE: &str = "ci";

/// One recorded call against the stub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    /// Resource plural, or "pods/log" for log reads
    pub kind: String,
    /// Empty for cluster-wide calls
    pub namespace: String,
    /// Empty for list calls
    pub name: String,
    pub selector: Option<String>,
}

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    pod_logs: BTreeMap<(String, String), String>,
    failures: BTreeMap<String, ClientError>,
    stalled: BTreeSet<String>,
    calls: Vec<Call>,
}

/// In-memory `ResourceClient`
#[derive(Default)]
pub struct StubResourceClient {
    state: Mutex<State>,
    generated: AtomicUsize,
    forbidden: bool,
}

impl StubResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub that panics on any call, for paths that must not touch the cluster
    pub fn forbidden() -> Self {
        Self {
            forbidden: true,
            ..Self::default()
        }
    }

    /// Store a document under its `metadata.name`
    pub fn insert(&self, kind: &ResourceKind, namespace: &str, doc: Value) {
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let key = (kind.plural.to_string(), namespace.to_string(), name);
        self.state.lock().unwrap().objects.insert(key, doc);
    }

    pub fn insert_workflow(&self, doc: Value) {
        self.insert(&ResourceKind::WORKFLOW, NAMESPACE, doc);
    }

    pub fn set_pod_log(&self, pod: &str, text: &str) {
        self.state
            .lock()
            .unwrap()
            .pod_logs
            .insert((NAMESPACE.to_string(), pod.to_string()), text.to_string());
    }

    /// Every call for `kind` fails with `err`
    pub fn fail(&self, kind: &ResourceKind, err: ClientError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(kind.plural.to_string(), err);
    }

    /// Every call for `kind` never completes
    pub fn stall(&self, kind: &ResourceKind) {
        self.state
            .lock()
            .unwrap()
            .stalled
            .insert(kind.plural.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    /// Stored documents of a kind in a namespace
    pub fn stored(&self, kind: &ResourceKind, namespace: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind.plural && ns == namespace)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn record(
        &self,
        op: &'static str,
        kind: &str,
        namespace: &str,
        name: &str,
        selector: Option<&LabelSelector>,
    ) -> (Option<ClientError>, bool) {
        if self.forbidden {
            panic!("unexpected {} {} call against the cluster", op, kind);
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector: selector.map(|s| s.to_string()),
        });
        (state.failures.get(kind).cloned(), state.stalled.contains(kind))
    }

    async fn gate(
        &self,
        op: &'static str,
        kind: &str,
        namespace: &str,
        name: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<()> {
        let (failure, stalled) = self.record(op, kind, namespace, name, selector);
        if stalled {
            std::future::pending::<()>().await;
        }
        // Let concurrent callers interleave
        tokio::task::yield_now().await;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn select(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind.plural && namespace.map_or(true, |n| n == ns))
            .filter(|(_, doc)| {
                let labels: Vec<(&str, &str)> = doc["metadata"]["labels"]
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v)))
                            .collect()
                    })
                    .unwrap_or_default();
                selector.map_or(true, |s| s.matches(labels.iter().copied()))
            })
            .map(|(_, doc)| doc.clone())
            .collect()
    }
}

fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait]
impl ResourceClient for StubResourceClient {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>> {
        self.gate("list", kind.plural, namespace, "", selector).await?;
        Ok(self.select(kind, Some(namespace), selector))
    }

    async fn list_cluster(
        &self,
        kind: &ResourceKind,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>> {
        self.gate("list_cluster", kind.plural, "", "", selector).await?;
        Ok(self.select(kind, None, selector))
    }

    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<RawResource> {
        self.gate("get", kind.plural, namespace, name, None).await?;
        let key = (kind.plural.to_string(), namespace.to_string(), name.to_string());
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| kind.not_found(name))
    }

    async fn get_cluster(&self, kind: &ResourceKind, name: &str) -> Result<RawResource> {
        self.gate("get_cluster", kind.plural, "", name, None).await?;
        let key = (kind.plural.to_string(), String::new(), name.to_string());
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| kind.not_found(name))
    }

    async fn create(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        body: &RawResource,
    ) -> Result<RawResource> {
        self.gate("create", kind.plural, namespace, "", None).await?;

        let mut doc = body.clone();
        let name = match doc["metadata"]["name"].as_str() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let prefix = doc["metadata"]["generateName"].as_str().unwrap_or_default();
                let n = self.generated.fetch_add(1, Ordering::SeqCst);
                format!("{}{:05x}", prefix, n)
            }
        };
        doc["metadata"]["name"] = json!(name);
        doc["metadata"]["uid"] = json!(uuid::Uuid::new_v4().to_string());
        doc["metadata"]["creationTimestamp"] = json!("2024-05-01T10:00:00Z");

        let key = (kind.plural.to_string(), namespace.to_string(), name.clone());
        let mut state = self.state.lock().unwrap();
        if state.objects.contains_key(&key) {
            return Err(ClientError::InvalidInput(format!(
                "{} '{}' already exists",
                kind.kind, name
            )));
        }
        state.objects.insert(key, doc.clone());
        Ok(doc)
    }

    async fn delete(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.gate("delete", kind.plural, namespace, name, None).await?;
        let key = (kind.plural.to_string(), namespace.to_string(), name.to_string());
        match self.state.lock().unwrap().objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(kind.not_found(name)),
        }
    }

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<RawResource> {
        self.gate("patch", kind.plural, namespace, name, None).await?;
        let key = (kind.plural.to_string(), namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        let doc = state.objects.get_mut(&key).ok_or_else(|| kind.not_found(name))?;
        merge_patch(doc, patch);
        Ok(doc.clone())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, _container: &str) -> Result<String> {
        self.gate("pod_logs", "pods/log", namespace, pod, None).await?;
        self.state
            .lock()
            .unwrap()
            .pod_logs
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::not_found("Pod", pod))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn cluster_config() -> ClientConfig {
    ClientConfig::new(NAMESPACE, "https://cluster.test")
}

/// Service over the stub with cluster-native strategies
pub fn service(stub: &Arc<StubResourceClient>) -> WorkflowService {
    WorkflowService::new(Arc::new(cluster_config()), stub.clone(), None)
}

/// Service whose logs and control go to an engine at `engine_url`
pub fn engine_service(stub: &Arc<StubResourceClient>, engine_url: &str) -> WorkflowService {
    let config = cluster_config().with_engine(engine_url, "engine-token");
    let engine = ArgoServerClient::new(
        config.engine.as_ref().unwrap(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap();
    WorkflowService::new(Arc::new(config), stub.clone(), Some(engine))
}

pub fn workflow_doc(name: &str, phase: &str) -> Value {
    json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Workflow",
        "metadata": {"name": name, "namespace": NAMESPACE, "labels": {"team": "ci"}},
        "spec": {"entrypoint": "main"},
        "status": {"phase": phase, "startedAt": "2024-05-01T10:00:00Z"}
    })
}

pub fn template_doc(name: &str, parameters: Value) -> Value {
    json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "WorkflowTemplate",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {
            "entrypoint": "main",
            "arguments": {"parameters": parameters},
            "templates": [{"name": "main", "container": {"image": "busybox"}}]
        }
    })
}

pub fn cluster_template_doc(name: &str) -> Value {
    json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "ClusterWorkflowTemplate",
        "metadata": {"name": name},
        "spec": {
            "entrypoint": "main",
            "templates": [{"name": "main", "script": {"image": "python"}}]
        }
    })
}

pub fn pod_doc(name: &str, workflow: &str, node_id: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": NAMESPACE,
            "labels": {"workflows.argoproj.io/workflow": workflow},
            "annotations": {"workflows.argoproj.io/node-id": node_id}
        }
    })
}

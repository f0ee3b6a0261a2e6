//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface over the cluster control plane
//! (custom resources, pods) and the workflow engine's own HTTP API.
//! Everything above this layer talks to the cluster only through the
//! [`ResourceClient`] trait.

pub mod argo_server;
pub mod kube;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ClientError, Result};

// Re-export the concrete adapters
pub use argo_server::ArgoServerClient;
pub use kube::KubeClient;

/// An untyped resource document as returned by the control plane
pub type RawResource = Value;

/// Group of the workflow engine's custom resources
pub const WORKFLOW_GROUP: &str = "argoproj.io";
/// Version of the workflow engine's custom resources
pub const WORKFLOW_VERSION: &str = "v1alpha1";

/// Whether a kind lives inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Identifies a resource type by (group, version, plural)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKind {
    /// Empty for the core API group
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
    /// Singular kind name, used in error messages and bodies
    pub kind: &'static str,
    pub scope: Scope,
}

impl ResourceKind {
    pub const WORKFLOW: ResourceKind = ResourceKind {
        group: WORKFLOW_GROUP,
        version: WORKFLOW_VERSION,
        plural: "workflows",
        kind: "Workflow",
        scope: Scope::Namespaced,
    };

    pub const WORKFLOW_TEMPLATE: ResourceKind = ResourceKind {
        group: WORKFLOW_GROUP,
        version: WORKFLOW_VERSION,
        plural: "workflowtemplates",
        kind: "WorkflowTemplate",
        scope: Scope::Namespaced,
    };

    pub const CLUSTER_WORKFLOW_TEMPLATE: ResourceKind = ResourceKind {
        group: WORKFLOW_GROUP,
        version: WORKFLOW_VERSION,
        plural: "clusterworkflowtemplates",
        kind: "ClusterWorkflowTemplate",
        scope: Scope::Cluster,
    };

    pub const POD: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        plural: "pods",
        kind: "Pod",
        scope: Scope::Namespaced,
    };

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn not_found(&self, name: &str) -> ClientError {
        ClientError::not_found(self.kind, name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.group)
        }
    }
}

/// Conjunction of `key=value` label requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push((key.into(), value.into()));
        self
    }

    /// Parse `k=v,k2=v2`
    pub fn parse(raw: &str) -> Result<Self> {
        let mut selector = Self::new();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term.split_once('=').ok_or_else(|| {
                ClientError::InvalidInput(format!(
                    "Label selector term '{}' is not of the form key=value",
                    term
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ClientError::InvalidInput(format!(
                    "Label selector term '{}' has an empty key",
                    term
                )));
            }
            selector = selector.with(key, value.trim());
        }
        Ok(selector)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[(String, String)] {
        &self.terms
    }

    /// Whether a label map satisfies every requirement
    pub fn matches<'a, I>(&self, labels: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        self.terms.iter().all(|(k, v)| {
            labels
                .clone()
                .into_iter()
                .any(|(lk, lv)| lk == k.as_str() && lv == v.as_str())
        })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .terms
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

/// Generic access to the cluster control plane
///
/// Namespaced and cluster-wide calls are separate methods; callers pick one
/// explicitly. `get`, `delete` and `patch` report a vanished resource as
/// [`ClientError::NotFound`].
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List resources of a namespaced kind in one namespace
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>>;

    /// List a cluster-scoped kind, or a namespaced kind across all namespaces
    async fn list_cluster(
        &self,
        kind: &ResourceKind,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>>;

    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<RawResource>;

    async fn get_cluster(&self, kind: &ResourceKind, name: &str) -> Result<RawResource>;

    async fn create(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        body: &RawResource,
    ) -> Result<RawResource>;

    async fn delete(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<()>;

    /// Apply a JSON merge patch
    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<RawResource>;

    /// Read a pod container's log as text
    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String>;
}

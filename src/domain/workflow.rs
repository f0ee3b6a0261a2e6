//! Workflow runs as observed on the cluster.
//!
//! These types are produced by the transformer from raw resource documents.
//! The client never mutates a workflow's status; it only observes it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::step::{StepGraph, StepTemplate, WorkflowStep};

/// Coarse lifecycle state of a workflow or step
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    /// Anything the engine reports outside the five known phases
    #[default]
    Unknown,
}

impl Phase {
    /// Map an observed phase string, never failing
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::Unknown => "Unknown",
        }
    }

    /// The run reached a terminal state
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }

    /// The run ended without succeeding
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and metadata shared by every resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub name: String,
    /// Empty for cluster-scoped resources
    pub namespace: String,
    /// Cluster-assigned unique id
    pub uid: String,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// A named argument passed to a workflow or template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Option<String>,
    pub default: Option<String>,
    pub description: Option<String>,
    /// Source resolved by the engine at run time (config map, supplied, ...)
    pub value_from: Option<Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Explicit value, else the declared default
    pub fn effective_value(&self) -> Option<&str> {
        self.value.as_deref().or(self.default.as_deref())
    }

    /// Whether the parameter resolves without a caller-supplied value
    pub fn is_satisfied(&self) -> bool {
        self.effective_value().is_some() || self.value_from.is_some()
    }
}

/// How long finished runs are kept before garbage collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub seconds_after_completion: Option<i64>,
    pub seconds_after_success: Option<i64>,
    pub seconds_after_failure: Option<i64>,
}

/// Reference to the template a workflow was instantiated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    /// True for cluster-scoped templates
    pub cluster_scope: bool,
}

impl TemplateRef {
    pub fn namespaced(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster_scope: false,
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster_scope: true,
        }
    }
}

/// Desired state of a workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Name of the template that starts the run (empty if absent)
    pub entrypoint: String,
    pub templates: Vec<StepTemplate>,
    pub arguments: Vec<Parameter>,
    pub service_account: Option<String>,
    pub retention: Option<RetentionPolicy>,
    pub template_ref: Option<TemplateRef>,
    /// Spec keys this client does not model, kept verbatim
    pub extra: BTreeMap<String, Value>,
}

/// Resource time consumed by a run, in resource-seconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_seconds: i64,
    pub memory_seconds: i64,
    /// Other reported resources (gpu, ephemeral storage, ...)
    pub other: BTreeMap<String, i64>,
}

/// Observed state of a workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub phase: Phase,
    pub started_at: Option<DateTime<Utc>>,
    /// Never earlier than `started_at`
    pub finished_at: Option<DateTime<Utc>>,
    /// Progress string such as "3/5"
    pub progress: Option<String>,
    pub message: Option<String>,
    pub resource_usage: Option<ResourceUsage>,
    /// Anomalies found while reading the raw status
    pub warnings: Vec<String>,
    /// Status keys this client does not model, kept verbatim
    pub extra: BTreeMap<String, Value>,
}

impl WorkflowStatus {
    /// Started but not finished
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    /// Wall-clock run time, if the run has finished
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(finish)) => Some(finish - start),
            _ => None,
        }
    }
}

/// A workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub meta: ResourceMeta,
    pub spec: WorkflowSpec,
    pub status: WorkflowStatus,
    /// Execution graph, root first
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn phase(&self) -> Phase {
        self.status.phase
    }

    /// Read-only graph view over the steps
    pub fn graph(&self) -> StepGraph<'_> {
        StepGraph::new(&self.steps)
    }

    /// Steps that ran as pods, in execution order
    pub fn pod_steps(&self) -> Vec<&WorkflowStep> {
        self.steps.iter().filter(|s| s.is_pod()).collect()
    }

    /// Find a step by id, name, display name or template name
    pub fn find_step(&self, needle: &str) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .find(|s| s.id == needle)
            .or_else(|| self.steps.iter().find(|s| s.name == needle))
            .or_else(|| self.steps.iter().find(|s| s.display_name == needle))
            .or_else(|| self.steps.iter().find(|s| s.template_name == needle))
    }
}

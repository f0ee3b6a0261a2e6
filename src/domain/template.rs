//! Reusable workflow templates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::step::StepTemplate;
use super::workflow::{Parameter, ResourceMeta};

/// Where a template lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateScope {
    Namespaced,
    Cluster,
}

/// A reusable workflow spec with default arguments and no status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub meta: ResourceMeta,
    pub scope: TemplateScope,
    pub entrypoint: String,
    pub templates: Vec<StepTemplate>,
    /// Default arguments, in declaration order
    pub arguments: Vec<Parameter>,
    pub extra: BTreeMap<String, Value>,
}

impl WorkflowTemplate {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Declared parameters that have no value, default or external source
    pub fn required_parameters(&self) -> Vec<&str> {
        self.arguments
            .iter()
            .filter(|p| !p.is_satisfied())
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Namespaced and cluster-scoped templates gathered together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateCatalog {
    pub namespaced: Vec<WorkflowTemplate>,
    pub cluster: Vec<WorkflowTemplate>,
}

impl TemplateCatalog {
    pub fn len(&self) -> usize {
        self.namespaced.len() + self.cluster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Execution steps and the templates that define them.
//!
//! A workflow's steps form a DAG through their child ids. The engine is
//! trusted to keep the graph acyclic, but every traversal here still carries
//! a visited set so malformed input cannot loop forever.

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::{Parameter, Phase};

/// A node in a workflow's execution graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Node type tag: Pod, DAG, Steps, StepGroup, Retry, Skipped, ...
    pub step_type: String,
    pub template_name: String,
    pub phase: Phase,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub children: Vec<String>,
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
}

impl WorkflowStep {
    /// Steps of this type correspond to exactly one pod
    pub fn is_pod(&self) -> bool {
        self.step_type == "Pod"
    }
}

/// Read-only traversal helpers over a step list
pub struct StepGraph<'a> {
    steps: &'a [WorkflowStep],
    index: BTreeMap<&'a str, usize>,
}

impl<'a> StepGraph<'a> {
    pub fn new(steps: &'a [WorkflowStep]) -> Self {
        let index = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        Self { steps, index }
    }

    pub fn get(&self, id: &str) -> Option<&'a WorkflowStep> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Steps that are nobody's child
    pub fn roots(&self) -> Vec<&'a WorkflowStep> {
        let children: HashSet<&str> = self
            .steps
            .iter()
            .flat_map(|s| s.children.iter().map(String::as_str))
            .collect();
        self.steps
            .iter()
            .filter(|s| !children.contains(s.id.as_str()))
            .collect()
    }

    /// Breadth-first walk from `root`, each step visited once
    pub fn walk(&self, root: &str) -> Vec<&'a WorkflowStep> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        if let Some(step) = self.get(root) {
            queue.push_back(step.id.as_str());
        }

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(step) = self.get(id) else {
                // Dangling child reference
                continue;
            };
            order.push(step);
            for child in &step.children {
                if !visited.contains(child.as_str()) {
                    queue.push_back(child.as_str());
                }
            }
        }

        order
    }

    /// Every step reachable from `id`, excluding `id` itself
    pub fn descendants(&self, id: &str) -> Vec<&'a WorkflowStep> {
        self.walk(id).into_iter().filter(|s| s.id != id).collect()
    }
}

/// What a step template does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateKind {
    Container,
    Script,
    Dag,
    Steps,
    Resource,
    Suspend,
    #[default]
    Unknown,
}

/// A task orchestrated by a DAG or steps template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateTask {
    pub name: String,
    /// Template the task runs
    pub template: String,
    pub dependencies: Vec<String>,
}

/// A reusable unit of work inside a workflow or template spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    pub kind: TemplateKind,
    pub tasks: Vec<TemplateTask>,
}

//! Domain types for the workflow client.
//!
//! This module contains the typed model every other component works with:
//! - Workflow: a run, its spec, status and step graph
//! - Step: execution graph nodes and step templates
//! - Template: reusable workflow specs
//! - Stats: summary counts

pub mod stats;
pub mod step;
pub mod template;
pub mod workflow;

// Re-export commonly used types
pub use stats::{Overview, PhaseCounts, WorkflowStatistics};
pub use step::{StepGraph, StepTemplate, TemplateKind, TemplateTask, WorkflowStep};
pub use template::{TemplateCatalog, TemplateScope, WorkflowTemplate};
pub use workflow::{
    Parameter, Phase, ResourceMeta, ResourceUsage, RetentionPolicy, TemplateRef, Workflow,
    WorkflowSpec, WorkflowStatus,
};

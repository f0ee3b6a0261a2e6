//! Core workflow client logic.
//!
//! This module contains:
//! - Transform: raw resource documents to domain types
//! - Logs: engine-native and cluster-native log strategies
//! - Control: retry and stop strategies
//! - Submission: template instantiation
//! - Statistics: phase counts over a namespace
//! - Service: the facade tying them together

pub mod control;
pub mod logs;
pub mod service;
pub mod statistics;
pub mod submission;
pub mod transform;

// Re-export commonly used types
pub use control::{control_for, ClusterControl, EngineControl, WorkflowControl};
pub use logs::{
    log_source_for, normalize_log_text, pod_name, ClusterLogSource, EngineLogSource, LogSource,
};
pub use service::{with_cancellation, WorkflowService};
pub use statistics::StatisticsAggregator;
pub use submission::{merge_arguments, validate_resource_name, SubmissionBuilder};
pub use transform::{template_from_raw, workflow_from_raw};

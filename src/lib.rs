//! flowbridge - Client for cluster-resident workflow runs
//!
//! Submits, inspects, controls and summarizes workflows executed by a
//! workflow engine on a container cluster. The cluster's control plane is
//! the source of truth; this crate keeps no state of its own.
//!
//! # Architecture
//!
//! - Every cluster read and write goes through the `ResourceClient` trait
//! - Raw documents are mapped to typed values by total functions
//! - Logs and lifecycle control pick an engine-native or cluster-native
//!   strategy once, from configuration
//! - Aggregate queries fan out concurrently and degrade per lookup
//!
//! # Modules
//!
//! - `adapters`: Control plane and engine HTTP clients
//! - `core`: Transformer, strategies, submission, statistics, service
//! - `domain`: Workflow, template and statistics types
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a workflow from a template
//! flowbridge submit build-template -p branch=main
//!
//! # Follow up on it
//! flowbridge get build-template-x7k2p
//! flowbridge logs build-template-x7k2p --step build
//!
//! # Namespace summary
//! flowbridge stats -n ci
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use adapters::{LabelSelector, RawResource, ResourceClient, ResourceKind};
pub use config::ClientConfig;
pub use core::{with_cancellation, WorkflowService};
pub use domain::{
    Overview, Parameter, Phase, PhaseCounts, TemplateCatalog, TemplateRef, Workflow,
    WorkflowStatistics, WorkflowStep, WorkflowTemplate,
};
pub use error::{ClientError, Result};

//! The workflow service facade.
//!
//! Coordinates the resource client, transformer, log and control strategies,
//! submission and statistics behind one surface for the boundary layer.
//! Every operation takes an optional namespace that falls back to the
//! configured one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    ArgoServerClient, KubeClient, LabelSelector, RawResource, ResourceClient, ResourceKind,
};
use crate::config::ClientConfig;
use crate::domain::{
    Overview, Phase, PhaseCounts, TemplateCatalog, TemplateRef, TemplateScope, Workflow,
    WorkflowStatistics, WorkflowTemplate,
};
use crate::error::{ClientError, Result};

use super::control::{control_for, WorkflowControl};
use super::logs::{log_source_for, LogSource};
use super::statistics::{summarize, StatisticsAggregator};
use super::submission::SubmissionBuilder;
use super::transform::{template_from_raw, workflow_from_raw};

/// Entry point for every workflow operation
pub struct WorkflowService {
    config: Arc<ClientConfig>,
    resources: Arc<dyn ResourceClient>,
    logs: Arc<dyn LogSource>,
    control: Arc<dyn WorkflowControl>,
    submissions: SubmissionBuilder,
    statistics: StatisticsAggregator,
}

impl WorkflowService {
    /// Wire a service from an already built resource client
    ///
    /// `engine` is used for logs and control only when `config` carries
    /// engine credentials.
    pub fn new(
        config: Arc<ClientConfig>,
        resources: Arc<dyn ResourceClient>,
        engine: Option<ArgoServerClient>,
    ) -> Self {
        let logs = log_source_for(&config, resources.clone(), engine.clone());
        let control = control_for(&config, resources.clone(), engine);
        debug!(
            logs = logs.name(),
            control = control.name(),
            "Workflow service strategies selected"
        );

        Self {
            submissions: SubmissionBuilder::new(resources.clone()),
            statistics: StatisticsAggregator::new(resources.clone()),
            config,
            resources,
            logs,
            control,
        }
    }

    /// Build the HTTP clients a configuration describes
    pub fn from_config(config: ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let kube = KubeClient::new(&config).context("Failed to create cluster client")?;
        let engine = match &config.engine {
            Some(engine) => Some(
                ArgoServerClient::new(engine, config.request_timeout, config.log_timeout)
                    .context("Failed to create engine client")?,
            ),
            None => None,
        };

        Ok(Self::new(Arc::new(config), Arc::new(kube), engine))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Name of the log strategy in use
    pub fn log_strategy(&self) -> &'static str {
        self.logs.name()
    }

    /// Name of the control strategy in use
    pub fn control_strategy(&self) -> &'static str {
        self.control.name()
    }

    fn namespace<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        match namespace {
            Some(ns) if !ns.is_empty() => ns,
            _ => &self.config.namespace,
        }
    }

    // ========================================================================
    // Workflows
    // ========================================================================

    /// List workflows, optionally filtered by labels
    ///
    /// Entries the transformer rejects are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn list_workflows(
        &self,
        namespace: Option<&str>,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<Workflow>> {
        let namespace = self.namespace(namespace);
        let selector = selector.filter(|s| !s.is_empty());
        let items = self
            .resources
            .list(&ResourceKind::WORKFLOW, namespace, selector)
            .await?;
        Ok(transform_all(&items, "workflow", workflow_from_raw))
    }

    #[instrument(skip(self))]
    pub async fn get_workflow(&self, namespace: Option<&str>, name: &str) -> Result<Workflow> {
        require_name(name)?;
        let raw = self
            .resources
            .get(&ResourceKind::WORKFLOW, self.namespace(namespace), name)
            .await?;
        workflow_from_raw(&raw)
    }

    /// Create a workflow from a caller-provided document
    #[instrument(skip(self, body))]
    pub async fn create_workflow(&self, namespace: Option<&str>, body: Value) -> Result<Workflow> {
        let declared_ns = body
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);
        let namespace = match namespace {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => declared_ns.unwrap_or_else(|| self.config.namespace.clone()),
        };

        let body = prepare_workflow_body(body, &namespace)?;
        let created = self
            .resources
            .create(&ResourceKind::WORKFLOW, &namespace, &body)
            .await?;
        let workflow = workflow_from_raw(&created)?;

        info!(workflow = %workflow.name(), %namespace, "Workflow created");
        Ok(workflow)
    }

    /// Instantiate a template with caller arguments
    #[instrument(skip(self, template, parameters), fields(template = %template.name))]
    pub async fn submit_from_template(
        &self,
        template: &TemplateRef,
        parameters: &BTreeMap<String, String>,
        namespace: Option<&str>,
    ) -> Result<Workflow> {
        self.submissions
            .submit(template, parameters, self.namespace(namespace))
            .await
    }

    #[instrument(skip(self))]
    pub async fn retry_workflow(&self, namespace: Option<&str>, name: &str) -> Result<Workflow> {
        require_name(name)?;
        self.control.retry(self.namespace(namespace), name).await
    }

    #[instrument(skip(self))]
    pub async fn stop_workflow(&self, namespace: Option<&str>, name: &str) -> Result<Workflow> {
        require_name(name)?;
        self.control.stop(self.namespace(namespace), name).await
    }

    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        require_name(name)?;
        let namespace = self.namespace(namespace);
        self.resources
            .delete(&ResourceKind::WORKFLOW, namespace, name)
            .await?;
        info!(namespace, name, "Workflow deleted");
        Ok(())
    }

    /// Logs of a workflow, or of one of its steps
    #[instrument(skip(self), fields(source = self.logs.name()))]
    pub async fn workflow_logs(
        &self,
        namespace: Option<&str>,
        name: &str,
        step: Option<&str>,
    ) -> Result<String> {
        require_name(name)?;
        self.logs.fetch(self.namespace(namespace), name, step).await
    }

    // ========================================================================
    // Templates
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn list_workflow_templates(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<WorkflowTemplate>> {
        let items = self
            .resources
            .list(&ResourceKind::WORKFLOW_TEMPLATE, self.namespace(namespace), None)
            .await?;
        Ok(transform_all(&items, "template", |raw| {
            template_from_raw(raw, TemplateScope::Namespaced)
        }))
    }

    #[instrument(skip(self))]
    pub async fn list_cluster_workflow_templates(&self) -> Result<Vec<WorkflowTemplate>> {
        let items = self
            .resources
            .list_cluster(&ResourceKind::CLUSTER_WORKFLOW_TEMPLATE, None)
            .await?;
        Ok(transform_all(&items, "cluster template", |raw| {
            template_from_raw(raw, TemplateScope::Cluster)
        }))
    }

    /// Namespaced and cluster templates together
    ///
    /// Both lookups always run to completion; a failed one contributes an
    /// empty list.
    #[instrument(skip(self))]
    pub async fn template_catalog(&self, namespace: Option<&str>) -> Result<TemplateCatalog> {
        let (namespaced, cluster) = tokio::join!(
            self.list_workflow_templates(namespace),
            self.list_cluster_workflow_templates()
        );

        let (namespaced, _) = settle("workflow templates", namespaced);
        let (cluster, _) = settle("cluster workflow templates", cluster);
        Ok(TemplateCatalog { namespaced, cluster })
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn statistics(&self, namespace: Option<&str>) -> Result<WorkflowStatistics> {
        self.statistics.statistics(self.namespace(namespace)).await
    }

    pub async fn phase_counts(&self, namespace: Option<&str>) -> Result<PhaseCounts> {
        self.statistics.phase_counts(self.namespace(namespace)).await
    }

    /// Statistics, active runs and templates of a namespace in one call
    ///
    /// Best effort: each failed lookup is listed in `warnings` and replaced
    /// by an empty result.
    #[instrument(skip(self))]
    pub async fn overview(&self, namespace: Option<&str>) -> Result<Overview> {
        let ns = self.namespace(namespace);
        let (workflows, namespaced, cluster) = tokio::join!(
            self.resources.list(&ResourceKind::WORKFLOW, ns, None),
            self.list_workflow_templates(Some(ns)),
            self.list_cluster_workflow_templates()
        );

        let mut warnings = Vec::new();
        let (workflows, failed) = settle("workflows", workflows);
        warnings.extend(failed);
        let (namespaced, failed) = settle("workflow templates", namespaced);
        warnings.extend(failed);
        let (cluster, failed) = settle("cluster workflow templates", cluster);
        warnings.extend(failed);

        let active = transform_all(&workflows, "workflow", workflow_from_raw)
            .into_iter()
            .filter(|wf| matches!(wf.phase(), Phase::Pending | Phase::Running))
            .map(|wf| wf.meta.name)
            .collect();

        Ok(Overview {
            namespace: ns.to_string(),
            statistics: summarize(&workflows),
            active,
            templates: TemplateCatalog { namespaced, cluster },
            warnings,
        })
    }
}

/// Run `operation` until it finishes or `token` fires
///
/// Cancelling drops the in-flight future, which aborts any HTTP request it
/// is waiting on.
pub async fn with_cancellation<T, F>(token: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(ClientError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Operation cancelled");
            Err(ClientError::Cancelled)
        }
        result = operation => result,
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ClientError::InvalidInput(
            "Workflow name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Degrade a failed secondary lookup to an empty result
fn settle<T: Default>(lookup: &str, result: Result<T>) -> (T, Option<String>) {
    match result {
        Ok(value) => (value, None),
        Err(err) => {
            warn!(lookup, error = %err, "Lookup failed, continuing with an empty result");
            (T::default(), Some(format!("{}: {}", lookup, err)))
        }
    }
}

fn transform_all<T>(
    items: &[RawResource],
    what: &str,
    transform: impl Fn(&RawResource) -> Result<T>,
) -> Vec<T> {
    items
        .iter()
        .filter_map(|raw| match transform(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable {}", what);
                None
            }
        })
        .collect()
}

/// Validate a raw workflow document and fill in identity fields
fn prepare_workflow_body(body: Value, namespace: &str) -> Result<Value> {
    let Value::Object(mut document) = body else {
        return Err(ClientError::InvalidInput(
            "Workflow body must be a JSON object".to_string(),
        ));
    };

    match document.get("kind").and_then(Value::as_str) {
        None | Some("Workflow") => {}
        Some(other) => {
            return Err(ClientError::InvalidInput(format!(
                "Expected kind Workflow, got {}",
                other
            )))
        }
    }

    let metadata = document
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(metadata) = metadata else {
        return Err(ClientError::InvalidInput(
            "Workflow metadata must be an object".to_string(),
        ));
    };

    let has_identity = ["name", "generateName"].iter().any(|key| {
        metadata
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|v| !v.is_empty())
    });
    if !has_identity {
        return Err(ClientError::InvalidInput(
            "Workflow metadata needs a name or generateName".to_string(),
        ));
    }
    metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));

    document.insert(
        "apiVersion".to_string(),
        Value::String(ResourceKind::WORKFLOW.api_version()),
    );
    document.insert(
        "kind".to_string(),
        Value::String(ResourceKind::WORKFLOW.kind.to_string()),
    );
    Ok(Value::Object(document))
}

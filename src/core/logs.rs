//! Log resolution strategies.
//!
//! Two ways to read a workflow's logs:
//! - engine-native: the engine's log endpoint, filtered by pod name when a
//!   step is named
//! - cluster-native: workflow -> pod steps -> pods -> container logs
//!
//! Both resolve a step name the same way (node id, name, display name or
//! template name; group nodes expand to the pods beneath them), so callers
//! see identical results whichever strategy runs.
//!
//! The strategy is picked once from configuration by [`log_source_for`].
//! A failing engine call is never retried through the cluster path.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::adapters::{ArgoServerClient, LabelSelector, ResourceClient, ResourceKind};
use crate::config::ClientConfig;
use crate::core::transform::{meta_from_raw, workflow_from_raw};
use crate::domain::{Workflow, WorkflowStep};
use crate::error::{ClientError, Result};

/// Pod label carrying the owning workflow's name
pub const WORKFLOW_LABEL: &str = "workflows.argoproj.io/workflow";
/// Pod annotation carrying the status node id the pod runs
pub const NODE_ID_ANNOTATION: &str = "workflows.argoproj.io/node-id";
/// Workflow annotation naming the pod naming scheme, `v1` or `v2`
pub const POD_NAME_FORMAT_ANNOTATION: &str = "workflows.argoproj.io/pod-name-format";

/// Longest pod name prefix that still leaves room for the hash suffix
const MAX_POD_PREFIX_LEN: usize = 242;

/// A way of fetching workflow logs
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Strategy name, for logging and diagnostics
    fn name(&self) -> &'static str;

    /// Logs of a whole workflow, or of one step when `step` is given
    async fn fetch(&self, namespace: &str, workflow: &str, step: Option<&str>) -> Result<String>;
}

/// Strip carriage returns, drop one trailing empty line, join with `\n`
pub fn normalize_log_text<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = lines
        .into_iter()
        .map(|l| l.as_ref().replace('\r', ""))
        .collect();
    if cleaned.last().is_some_and(|l| l.is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

/// Steps whose pods hold the requested logs, started ones first by start time
///
/// A named pod step resolves to itself, a DAG or steps group to every pod
/// beneath it. An unmatched name is `NotFound`.
fn steps_for<'a>(wf: &'a Workflow, step: Option<&str>) -> Result<Vec<&'a WorkflowStep>> {
    let mut steps: Vec<&WorkflowStep> = match step {
        Some(needle) => {
            let found = wf
                .find_step(needle)
                .ok_or_else(|| ClientError::not_found("Step", needle))?;
            if found.is_pod() {
                vec![found]
            } else {
                wf.graph()
                    .descendants(&found.id)
                    .into_iter()
                    .filter(|s| s.is_pod())
                    .collect()
            }
        }
        None => wf.pod_steps(),
    };
    // Unstarted steps keep graph order at the end
    steps.sort_by_key(|s| (s.started_at.is_none(), s.started_at));
    Ok(steps)
}

/// Name of the pod the engine creates for a step
///
/// `v1` naming uses the node id. `v2`, the default, is
/// `{workflow}-{template}-{fnv32a(node name)}`, or just the workflow name
/// for the root node.
pub fn pod_name(workflow: &Workflow, step: &WorkflowStep) -> String {
    let workflow_name = workflow.name();
    let format = workflow
        .meta
        .annotations
        .get(POD_NAME_FORMAT_ANNOTATION)
        .map(String::as_str);
    if format == Some("v1") {
        return step.id.clone();
    }
    if step.name == workflow_name {
        return workflow_name.to_string();
    }

    let mut prefix = if step.name.contains(".inline") {
        workflow_name.to_string()
    } else {
        format!("{}-{}", workflow_name, step.template_name)
    };
    if prefix.len() > MAX_POD_PREFIX_LEN {
        let mut end = MAX_POD_PREFIX_LEN;
        while !prefix.is_char_boundary(end) {
            end -= 1;
        }
        prefix.truncate(end);
    }
    format!("{}-{}", prefix, fnv1a_32(step.name.as_bytes()))
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0x811c_9dc5, |hash, b| (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193))
}

/// Reads logs through the engine's HTTP API
pub struct EngineLogSource {
    engine: ArgoServerClient,
    container: String,
}

impl EngineLogSource {
    pub fn new(engine: ArgoServerClient, container: impl Into<String>) -> Self {
        Self {
            engine,
            container: container.into(),
        }
    }
}

#[async_trait]
impl LogSource for EngineLogSource {
    fn name(&self) -> &'static str {
        "engine"
    }

    #[instrument(skip(self), fields(source = "engine"))]
    async fn fetch(&self, namespace: &str, workflow: &str, step: Option<&str>) -> Result<String> {
        let Some(needle) = step else {
            let lines = self
                .engine
                .workflow_logs(namespace, workflow, None, &self.container)
                .await?;
            return Ok(normalize_log_text(lines));
        };

        // The engine filters by pod name, so resolve the step first
        let raw = self.engine.get_workflow(namespace, workflow).await?;
        let wf = workflow_from_raw(&raw)?;
        let steps = steps_for(&wf, Some(needle))?;
        debug!(step = needle, pods = steps.len(), "Resolved step pods");

        let single = steps.len() == 1;
        let mut lines: Vec<String> = Vec::new();
        for node in steps {
            let pod = pod_name(&wf, node);
            match self
                .engine
                .workflow_logs(namespace, workflow, Some(&pod), &self.container)
                .await
            {
                Ok(chunk) => lines.extend(chunk),
                Err(err) if err.is_not_found() && !single => {
                    warn!(pod = %pod, "Pod log unavailable from engine, skipping");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(normalize_log_text(lines))
    }
}

/// Reads logs by walking workflow -> pods through the control plane
pub struct ClusterLogSource {
    resources: Arc<dyn ResourceClient>,
    container: String,
}

impl ClusterLogSource {
    pub fn new(resources: Arc<dyn ResourceClient>, container: impl Into<String>) -> Self {
        Self {
            resources,
            container: container.into(),
        }
    }

    /// Pod names of the workflow, keyed by the node id they run
    async fn pods_by_node(
        &self,
        namespace: &str,
        workflow: &str,
    ) -> Result<BTreeMap<String, String>> {
        let selector = LabelSelector::new().with(WORKFLOW_LABEL, workflow);
        let pods = self
            .resources
            .list(&ResourceKind::POD, namespace, Some(&selector))
            .await?;

        let mut by_node = BTreeMap::new();
        for pod in &pods {
            let meta = meta_from_raw(pod.get("metadata"));
            if meta.name.is_empty() {
                continue;
            }
            let node_id = meta
                .annotations
                .get(NODE_ID_ANNOTATION)
                .cloned()
                .unwrap_or_else(|| meta.name.clone());
            by_node.insert(node_id, meta.name);
        }
        Ok(by_node)
    }

    /// Map a step to its pod
    ///
    /// Pods without the node annotation are keyed by their own name, which
    /// is the node id under `v1` naming or the derived `v2` pod name.
    fn pod_for<'a>(
        by_node: &'a BTreeMap<String, String>,
        wf: &Workflow,
        step: &WorkflowStep,
    ) -> Option<&'a str> {
        by_node
            .get(&step.id)
            .or_else(|| by_node.get(&pod_name(wf, step)))
            .map(String::as_str)
    }
}

#[async_trait]
impl LogSource for ClusterLogSource {
    fn name(&self) -> &'static str {
        "cluster"
    }

    #[instrument(skip(self), fields(source = "cluster"))]
    async fn fetch(&self, namespace: &str, workflow: &str, step: Option<&str>) -> Result<String> {
        let raw: Value = self
            .resources
            .get(&ResourceKind::WORKFLOW, namespace, workflow)
            .await?;
        let wf = workflow_from_raw(&raw)?;

        let steps = steps_for(&wf, step)?;
        if steps.is_empty() {
            return Ok(String::new());
        }

        let by_node = self.pods_by_node(namespace, workflow).await?;
        debug!(steps = steps.len(), pods = by_node.len(), "Resolved workflow pods");

        // One explicitly requested pod must exist; in bulk reads missing pods are skipped
        let single = step.is_some() && steps.len() == 1;
        let mut lines: Vec<String> = Vec::new();
        for node in steps {
            let Some(pod) = Self::pod_for(&by_node, &wf, node) else {
                if single {
                    return Err(ClientError::not_found("Pod", &node.id));
                }
                debug!(step = %node.id, "No pod for step, skipping");
                continue;
            };

            match self.resources.pod_logs(namespace, pod, &self.container).await {
                Ok(text) => lines.extend(text.lines().map(str::to_string)),
                Err(err) if err.is_not_found() && !single => {
                    warn!(pod, "Pod vanished before its log could be read");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(normalize_log_text(lines))
    }
}

/// Pick the log strategy for a configuration
///
/// The engine path is used only when the configuration carries engine
/// credentials and a client for them was built.
pub fn log_source_for(
    config: &ClientConfig,
    resources: Arc<dyn ResourceClient>,
    engine: Option<ArgoServerClient>,
) -> Arc<dyn LogSource> {
    match engine {
        Some(engine) if config.uses_engine() => {
            Arc::new(EngineLogSource::new(engine, config.log_container.clone()))
        }
        _ => Arc::new(ClusterLogSource::new(resources, config.log_container.clone())),
    }
}

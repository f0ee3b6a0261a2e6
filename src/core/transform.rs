//! Raw resource documents to typed domain values.
//!
//! Every function here is pure and total over JSON objects:
//! - optional fields get explicit defaults (empty maps, empty strings, `Unknown`)
//! - missing substructure (`spec`, `status`, `nodes`) yields zero values
//! - unmodelled spec/status keys are kept under `extra`
//! - bad timestamps are dropped and reported in `status.warnings`
//!
//! The only rejected input is a document that is not a JSON object.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::{
    Parameter, Phase, ResourceMeta, ResourceUsage, RetentionPolicy, StepGraph, StepTemplate,
    TemplateKind, TemplateRef, TemplateScope, TemplateTask, Workflow, WorkflowSpec,
    WorkflowStatus, WorkflowStep, WorkflowTemplate,
};
use crate::error::{ClientError, Result};

const SPEC_KEYS: &[&str] = &[
    "entrypoint",
    "templates",
    "arguments",
    "serviceAccountName",
    "ttlStrategy",
    "workflowTemplateRef",
];

const STATUS_KEYS: &[&str] = &[
    "phase",
    "startedAt",
    "finishedAt",
    "progress",
    "message",
    "resourcesDuration",
    "nodes",
];

/// Convert a raw workflow document
pub fn workflow_from_raw(raw: &Value) -> Result<Workflow> {
    let object = as_object(raw, "Workflow")?;
    let meta = meta_from_raw(object.get("metadata"));
    let spec = workflow_spec_from_raw(object.get("spec"));

    let mut status = WorkflowStatus::default();
    let mut steps = Vec::new();
    if let Some(Value::Object(raw_status)) = object.get("status") {
        status = status_from_raw(raw_status);
        steps = steps_from_nodes(raw_status.get("nodes"), &meta.name, &mut status.warnings);
    }

    Ok(Workflow {
        meta,
        spec,
        status,
        steps,
    })
}

/// Convert a raw namespaced or cluster-scoped template document
pub fn template_from_raw(raw: &Value, scope: TemplateScope) -> Result<WorkflowTemplate> {
    let object = as_object(raw, "WorkflowTemplate")?;
    let meta = meta_from_raw(object.get("metadata"));
    let spec = object.get("spec").and_then(Value::as_object);

    Ok(WorkflowTemplate {
        meta,
        scope,
        entrypoint: spec
            .and_then(|s| string_field(s, "entrypoint"))
            .unwrap_or_default(),
        templates: step_templates_from_raw(spec.and_then(|s| s.get("templates"))),
        arguments: parameters_from_raw(spec.and_then(|s| s.pointer_in("arguments", "parameters"))),
        extra: spec.map(|s| extra_fields(s, SPEC_KEYS)).unwrap_or_default(),
    })
}

fn as_object<'a>(raw: &'a Value, kind: &str) -> Result<&'a Map<String, Value>> {
    raw.as_object().ok_or_else(|| {
        ClientError::Internal(format!(
            "{} document is not a JSON object (found {})",
            kind,
            json_type(raw)
        ))
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Nested lookup on a JSON object without building a pointer string
trait ObjectExt {
    fn pointer_in(&self, outer: &str, inner: &str) -> Option<&Value>;
}

impl ObjectExt for Map<String, Value> {
    fn pointer_in(&self, outer: &str, inner: &str) -> Option<&Value> {
        self.get(outer)?.as_object()?.get(inner)
    }
}

/// Scalars rendered as strings; null, arrays and objects are absent
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(scalar_string)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| scalar_string(v).map(|v| (k.clone(), v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_string).collect(),
        _ => Vec::new(),
    }
}

fn extra_fields(object: &Map<String, Value>, known: &[&str]) -> BTreeMap<String, Value> {
    object
        .iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn parse_time(
    object: &Map<String, Value>,
    key: &str,
    context: &str,
    warnings: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let raw = match object.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Null) | None => return None,
        Some(Value::String(_)) => return None,
        Some(other) => {
            warnings.push(format!(
                "{}: {} is a {}, not a timestamp",
                context,
                key,
                json_type(other)
            ));
            return None;
        }
    };

    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            warnings.push(format!("{}: unparseable {} '{}'", context, key, raw));
            None
        }
    }
}

/// Clamp a finish that precedes its start, recording the anomaly
fn checked_finish(
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    context: &str,
    warnings: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    match (started, finished) {
        (Some(start), Some(finish)) if finish < start => {
            warnings.push(format!(
                "{}: finishedAt {} precedes startedAt {}",
                context,
                finish.to_rfc3339(),
                start.to_rfc3339()
            ));
            Some(start)
        }
        _ => finished,
    }
}

/// Identity and metadata; absent metadata yields empty values
pub fn meta_from_raw(raw: Option<&Value>) -> ResourceMeta {
    let Some(Value::Object(meta)) = raw else {
        return ResourceMeta::default();
    };

    let mut ignored = Vec::new();
    ResourceMeta {
        name: string_field(meta, "name").unwrap_or_default(),
        namespace: string_field(meta, "namespace").unwrap_or_default(),
        uid: string_field(meta, "uid").unwrap_or_default(),
        created_at: parse_time(meta, "creationTimestamp", "metadata", &mut ignored),
        labels: string_map(meta.get("labels")),
        annotations: string_map(meta.get("annotations")),
    }
}

/// `[{name, value, default, description}]` to parameters; unnamed entries are dropped
pub fn parameters_from_raw(raw: Option<&Value>) -> Vec<Parameter> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|p| {
            let name = non_empty(string_field(p, "name"))?;
            Some(Parameter {
                name,
                value: string_field(p, "value"),
                default: string_field(p, "default"),
                description: non_empty(string_field(p, "description")),
                value_from: p.get("valueFrom").filter(|v| v.is_object()).cloned(),
            })
        })
        .collect()
}

fn workflow_spec_from_raw(raw: Option<&Value>) -> WorkflowSpec {
    let Some(Value::Object(spec)) = raw else {
        return WorkflowSpec::default();
    };

    let retention = spec.get("ttlStrategy").and_then(Value::as_object).map(|ttl| {
        RetentionPolicy {
            seconds_after_completion: ttl.get("secondsAfterCompletion").and_then(Value::as_i64),
            seconds_after_success: ttl.get("secondsAfterSuccess").and_then(Value::as_i64),
            seconds_after_failure: ttl.get("secondsAfterFailure").and_then(Value::as_i64),
        }
    });

    let template_ref = spec
        .get("workflowTemplateRef")
        .and_then(Value::as_object)
        .and_then(|r| {
            Some(TemplateRef {
                name: non_empty(string_field(r, "name"))?,
                cluster_scope: r.get("clusterScope").and_then(Value::as_bool).unwrap_or(false),
            })
        });

    WorkflowSpec {
        entrypoint: string_field(spec, "entrypoint").unwrap_or_default(),
        templates: step_templates_from_raw(spec.get("templates")),
        arguments: parameters_from_raw(spec.pointer_in("arguments", "parameters")),
        service_account: non_empty(string_field(spec, "serviceAccountName")),
        retention,
        template_ref,
        extra: extra_fields(spec, SPEC_KEYS),
    }
}

fn status_from_raw(status: &Map<String, Value>) -> WorkflowStatus {
    let mut warnings = Vec::new();
    let started_at = parse_time(status, "startedAt", "status", &mut warnings);
    let finished = parse_time(status, "finishedAt", "status", &mut warnings);
    let finished_at = checked_finish(started_at, finished, "status", &mut warnings);

    WorkflowStatus {
        phase: status
            .get("phase")
            .and_then(Value::as_str)
            .map(Phase::parse)
            .unwrap_or_default(),
        started_at,
        finished_at,
        progress: non_empty(string_field(status, "progress")),
        message: non_empty(string_field(status, "message")),
        resource_usage: resource_usage_from_raw(status.get("resourcesDuration")),
        warnings,
        extra: extra_fields(status, STATUS_KEYS),
    }
}

fn resource_usage_from_raw(raw: Option<&Value>) -> Option<ResourceUsage> {
    let Some(Value::Object(durations)) = raw else {
        return None;
    };

    let mut usage = ResourceUsage::default();
    for (resource, seconds) in durations {
        let Some(seconds) = seconds.as_i64() else {
            continue;
        };
        match resource.as_str() {
            "cpu" => usage.cpu_seconds = seconds,
            "memory" => usage.memory_seconds = seconds,
            other => {
                usage.other.insert(other.to_string(), seconds);
            }
        }
    }
    Some(usage)
}

/// Step templates of a workflow or template spec
pub fn step_templates_from_raw(raw: Option<&Value>) -> Vec<StepTemplate> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|t| {
            let (kind, tasks) = if t.contains_key("container") || t.contains_key("containerSet") {
                (TemplateKind::Container, Vec::new())
            } else if t.contains_key("script") {
                (TemplateKind::Script, Vec::new())
            } else if let Some(dag) = t.get("dag").and_then(Value::as_object) {
                (TemplateKind::Dag, dag_tasks(dag.get("tasks")))
            } else if t.contains_key("steps") {
                (TemplateKind::Steps, step_group_tasks(t.get("steps")))
            } else if t.contains_key("resource") {
                (TemplateKind::Resource, Vec::new())
            } else if t.contains_key("suspend") {
                (TemplateKind::Suspend, Vec::new())
            } else {
                (TemplateKind::Unknown, Vec::new())
            };

            StepTemplate {
                name: string_field(t, "name").unwrap_or_default(),
                kind,
                tasks,
            }
        })
        .collect()
}

/// Template a task runs, either inline or through a template reference
fn task_template(task: &Map<String, Value>) -> String {
    string_field(task, "template")
        .or_else(|| {
            task.get("templateRef")
                .and_then(Value::as_object)
                .and_then(|r| string_field(r, "template"))
        })
        .unwrap_or_default()
}

fn dag_tasks(raw: Option<&Value>) -> Vec<TemplateTask> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|task| {
            let mut dependencies = string_list(task.get("dependencies"));
            if let Some(expr) = task.get("depends").and_then(Value::as_str) {
                for target in depends_targets(expr) {
                    if !dependencies.contains(&target) {
                        dependencies.push(target);
                    }
                }
            }

            TemplateTask {
                name: string_field(task, "name").unwrap_or_default(),
                template: task_template(task),
                dependencies,
            }
        })
        .collect()
}

/// Task names referenced by a `depends` expression such as `a && (b.Succeeded || c)`
fn depends_targets(expr: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for token in expr.split(|c: char| c.is_whitespace() || "&|!()".contains(c)) {
        let name = token.split('.').next().unwrap_or_default();
        if !name.is_empty() && !targets.iter().any(|t| t == name) {
            targets.push(name.to_string());
        }
    }
    targets
}

/// Sequential groups of parallel steps; each step depends on the whole previous group
fn step_group_tasks(raw: Option<&Value>) -> Vec<TemplateTask> {
    let Some(Value::Array(groups)) = raw else {
        return Vec::new();
    };

    let mut tasks = Vec::new();
    let mut previous: Vec<String> = Vec::new();
    for group in groups {
        // A group may also be written as a single step object
        let members: Vec<&Map<String, Value>> = match group {
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            Value::Object(step) => vec![step],
            _ => continue,
        };

        let mut current = Vec::new();
        for step in members {
            let name = string_field(step, "name").unwrap_or_default();
            tasks.push(TemplateTask {
                name: name.clone(),
                template: task_template(step),
                dependencies: previous.clone(),
            });
            current.push(name);
        }
        previous = current;
    }
    tasks
}

/// Status nodes to steps, ordered root first
///
/// Nodes reachable from `root` come first in breadth-first order; any
/// remaining nodes follow in id order. Cycles and dangling child ids in the
/// raw graph are tolerated.
pub fn steps_from_nodes(
    raw: Option<&Value>,
    root: &str,
    warnings: &mut Vec<String>,
) -> Vec<WorkflowStep> {
    let Some(Value::Object(nodes)) = raw else {
        return Vec::new();
    };

    let mut all: Vec<WorkflowStep> = nodes
        .iter()
        .filter_map(|(key, node)| node.as_object().map(|n| step_from_node(key, n, warnings)))
        .collect();
    all.sort_by(|a, b| a.id.cmp(&b.id));

    let graph = StepGraph::new(&all);
    let starts: Vec<String> = if graph.get(root).is_some() {
        vec![root.to_string()]
    } else {
        graph.roots().iter().map(|s| s.id.clone()).collect()
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut order: Vec<String> = Vec::new();
    for start in &starts {
        for step in graph.walk(start) {
            if seen.insert(step.id.clone()) {
                order.push(step.id.clone());
            }
        }
    }
    for step in &all {
        if seen.insert(step.id.clone()) {
            order.push(step.id.clone());
        }
    }

    let mut by_id: BTreeMap<String, WorkflowStep> =
        all.into_iter().map(|s| (s.id.clone(), s)).collect();
    order.iter().filter_map(|id| by_id.remove(id)).collect()
}

fn step_from_node(
    key: &str,
    node: &Map<String, Value>,
    warnings: &mut Vec<String>,
) -> WorkflowStep {
    let id = non_empty(string_field(node, "id")).unwrap_or_else(|| key.to_string());
    let context = format!("node {}", id);
    let started_at = parse_time(node, "startedAt", &context, warnings);
    let finished = parse_time(node, "finishedAt", &context, warnings);
    let finished_at = checked_finish(started_at, finished, &context, warnings);

    WorkflowStep {
        name: string_field(node, "name").unwrap_or_default(),
        display_name: string_field(node, "displayName").unwrap_or_default(),
        step_type: string_field(node, "type").unwrap_or_default(),
        template_name: non_empty(string_field(node, "templateName"))
            .or_else(|| {
                node.get("templateRef")
                    .and_then(|r| r.get("template"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default(),
        phase: node
            .get("phase")
            .and_then(Value::as_str)
            .map(Phase::parse)
            .unwrap_or_default(),
        started_at,
        finished_at,
        message: non_empty(string_field(node, "message")),
        children: string_list(node.get("children")),
        inputs: parameters_from_raw(node.pointer_in("inputs", "parameters")),
        outputs: parameters_from_raw(node.pointer_in("outputs", "parameters")),
        id,
    }
}

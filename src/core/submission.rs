//! Workflow instantiation from templates.
//!
//! A submission fetches the template, merges caller arguments into the
//! template's declared parameters and creates a new workflow under a
//! cluster-generated name. The builder never picks a name itself, so
//! concurrent submissions from one template cannot collide.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::adapters::{ResourceClient, ResourceKind};
use crate::core::transform::workflow_from_raw;
use crate::domain::{TemplateRef, Workflow};
use crate::error::{ClientError, Result};

/// Label naming the namespaced template a workflow came from
pub const TEMPLATE_LABEL: &str = "workflows.argoproj.io/workflow-template";
/// Label naming the cluster template a workflow came from
pub const CLUSTER_TEMPLATE_LABEL: &str = "workflows.argoproj.io/cluster-workflow-template";
/// Standard label identifying the tool that created a resource
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "flowbridge";

const MAX_NAME_LEN: usize = 253;

/// Creates workflows from templates
pub struct SubmissionBuilder {
    resources: Arc<dyn ResourceClient>,
}

impl SubmissionBuilder {
    pub fn new(resources: Arc<dyn ResourceClient>) -> Self {
        Self { resources }
    }

    /// Instantiate `template` in `namespace` with caller-supplied arguments
    #[instrument(
        skip(self, template, parameters),
        fields(template = %template.name, cluster = template.cluster_scope)
    )]
    pub async fn submit(
        &self,
        template: &TemplateRef,
        parameters: &BTreeMap<String, String>,
        namespace: &str,
    ) -> Result<Workflow> {
        validate_resource_name(&template.name)?;
        if parameters.keys().any(|k| k.trim().is_empty()) {
            return Err(ClientError::InvalidInput(
                "Parameter names must not be empty".to_string(),
            ));
        }

        let raw_template = if template.cluster_scope {
            self.resources
                .get_cluster(&ResourceKind::CLUSTER_WORKFLOW_TEMPLATE, &template.name)
                .await?
        } else {
            self.resources
                .get(&ResourceKind::WORKFLOW_TEMPLATE, namespace, &template.name)
                .await?
        };
        if !raw_template.is_object() {
            return Err(ClientError::Internal(format!(
                "Template '{}' is not a JSON object",
                template.name
            )));
        }

        let declared = raw_template
            .pointer("/spec/arguments/parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let arguments = merge_arguments(declared, parameters)?;
        let body = workflow_body(&raw_template, template, &arguments, namespace);

        let created = self
            .resources
            .create(&ResourceKind::WORKFLOW, namespace, &body)
            .await?;
        let workflow = workflow_from_raw(&created)?;

        info!(
            workflow = %workflow.name(),
            namespace,
            arguments = arguments.len(),
            "Workflow submitted from template"
        );
        Ok(workflow)
    }
}

/// Check a name against the DNS-1123 subdomain rules resource names follow
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ClientError::InvalidInput(
            "Template name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ClientError::InvalidInput(format!(
            "Template name is {} characters, the limit is {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.';
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts_ok = name.chars().next().is_some_and(alnum);
    let ends_ok = name.chars().last().is_some_and(alnum);

    if !name.chars().all(allowed) || !starts_ok || !ends_ok {
        return Err(ClientError::InvalidInput(format!(
            "Template name '{}' must consist of lowercase alphanumerics, '-' or '.', \
             and start and end with an alphanumeric",
            name
        )));
    }
    Ok(())
}

/// Merge supplied values into the template's declared parameters
///
/// Declared parameters keep their order and every key they carry (`enum`,
/// `description`, `globalName`, ...). A supplied value replaces `value` and
/// any `valueFrom` by name; otherwise a bare `default` is copied into
/// `value`. Undeclared supplied names are appended in name order. A declared
/// parameter with no value, default or `valueFrom` is an error unless
/// supplied.
pub fn merge_arguments(
    declared: &[Value],
    supplied: &BTreeMap<String, String>,
) -> Result<Vec<Value>> {
    let mut merged = Vec::with_capacity(declared.len() + supplied.len());
    let mut declared_names = BTreeSet::new();
    let mut missing = Vec::new();

    for raw in declared {
        let Some(param) = raw.as_object() else {
            continue;
        };
        let Some(name) = param
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
        else {
            continue;
        };
        declared_names.insert(name);

        let mut param = param.clone();
        if let Some(value) = supplied.get(name) {
            param.remove("valueFrom");
            param.insert("value".to_string(), json!(value));
        } else if !has_field(&param, "value") {
            if let Some(default) = param.get("default").filter(|v| !v.is_null()).cloned() {
                param.insert("value".to_string(), default);
            } else if !has_field(&param, "valueFrom") {
                missing.push(name);
            }
        }
        merged.push(Value::Object(param));
    }

    if !missing.is_empty() {
        return Err(ClientError::InvalidInput(format!(
            "Missing value for required parameter(s): {}",
            missing.join(", ")
        )));
    }

    for (name, value) in supplied {
        if !declared_names.contains(name.as_str()) {
            merged.push(json!({ "name": name, "value": value }));
        }
    }

    Ok(merged)
}

fn has_field(param: &Map<String, Value>, key: &str) -> bool {
    param.get(key).is_some_and(|v| !v.is_null())
}

/// Workflow document for a template instantiation
fn workflow_body(
    raw_template: &Value,
    template: &TemplateRef,
    arguments: &[Value],
    namespace: &str,
) -> Value {
    let mut spec = raw_template
        .get("spec")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut args = spec
        .remove("arguments")
        .and_then(|a| a.as_object().cloned())
        .unwrap_or_default();
    args.remove("parameters");
    if !arguments.is_empty() {
        args.insert("parameters".to_string(), Value::Array(arguments.to_vec()));
    }
    if !args.is_empty() {
        spec.insert("arguments".to_string(), Value::Object(args));
    }

    let origin = if template.cluster_scope {
        CLUSTER_TEMPLATE_LABEL
    } else {
        TEMPLATE_LABEL
    };
    let mut labels = Map::new();
    labels.insert(origin.to_string(), json!(template.name));
    labels.insert(MANAGED_BY_LABEL.to_string(), json!(MANAGER));

    json!({
        "apiVersion": ResourceKind::WORKFLOW.api_version(),
        "kind": ResourceKind::WORKFLOW.kind,
        "metadata": {
            "generateName": format!("{}-", template.name),
            "namespace": namespace,
            "labels": labels,
        },
        "spec": spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_keeps_order_and_appends_sorted() {
        let template = vec![
            json!({"name": "branch", "value": "main"}),
            json!({"name": "target", "default": "release"}),
        ];
        let merged = merge_arguments(
            &template,
            &supplied(&[("zeta", "1"), ("branch", "dev"), ("alpha", "2")]),
        )
        .unwrap();

        let names: Vec<&str> = merged.iter().filter_map(|p| p["name"].as_str()).collect();
        assert_eq!(names, vec!["branch", "target", "alpha", "zeta"]);
        assert_eq!(merged[0]["value"], "dev");
        assert_eq!(merged[1], json!({"name": "target", "default": "release", "value": "release"}));
        assert_eq!(merged[2], json!({"name": "alpha", "value": "2"}));
    }

    #[test]
    fn test_merge_empty_keeps_defaults() {
        let template = vec![json!({"name": "branch", "value": "main"})];
        let merged = merge_arguments(&template, &BTreeMap::new()).unwrap();
        assert_eq!(merged, template);
    }

    #[test]
    fn test_merge_keeps_declared_keys() {
        let template = vec![
            json!({"name": "branch", "value": "main", "enum": ["main", "dev"]}),
            json!({
                "name": "registry",
                "valueFrom": {"configMapKeyRef": {"name": "ci", "key": "registry"}}
            }),
            json!({"name": "build-id", "globalName": "build", "valueFrom": {"supplied": {}}}),
        ];

        let merged = merge_arguments(&template, &BTreeMap::new()).unwrap();
        assert_eq!(merged, template);

        let overrides = supplied(&[("branch", "dev"), ("build-id", "7")]);
        let merged = merge_arguments(&template, &overrides).unwrap();
        assert_eq!(
            merged[0],
            json!({"name": "branch", "value": "dev", "enum": ["main", "dev"]})
        );
        assert_eq!(merged[1], template[1]);
        assert_eq!(merged[2], json!({"name": "build-id", "globalName": "build", "value": "7"}));
    }

    #[test]
    fn test_merge_skips_unnamed_entries() {
        let template = vec![
            json!("garbage"),
            json!({"value": "orphan"}),
            json!({"name": "a", "value": 1}),
        ];
        let merged = merge_arguments(&template, &BTreeMap::new()).unwrap();
        assert_eq!(merged, vec![json!({"name": "a", "value": 1})]);
    }

    #[test]
    fn test_merge_reports_missing_required() {
        let template = vec![json!({"name": "image"}), json!({"name": "tag", "value": null})];
        let err = merge_arguments(&template, &supplied(&[("tag", "v1")])).unwrap_err();

        match err {
            ClientError::InvalidInput(msg) => {
                assert!(msg.contains("image"));
                assert!(!msg.contains("tag"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resource_name_validation() {
        assert!(validate_resource_name("build-template").is_ok());
        assert!(validate_resource_name("ci.build-2").is_ok());

        for bad in ["", "Build", "build_template", "-build", "build-", "a b"] {
            assert!(
                matches!(validate_resource_name(bad), Err(ClientError::InvalidInput(_))),
                "accepted {bad:?}"
            );
        }
        assert!(validate_resource_name(&"a".repeat(254)).is_err());
        assert!(validate_resource_name(&"a".repeat(253)).is_ok());
    }

    #[test]
    fn test_workflow_body() {
        let raw = json!({
            "metadata": {"name": "build-template", "resourceVersion": "42"},
            "spec": {
                "entrypoint": "main",
                "arguments": {
                    "parameters": [{"name": "branch", "value": "main", "enum": ["main", "dev"]}],
                    "artifacts": [{"name": "src"}]
                },
                "templates": [{"name": "main", "container": {"image": "busybox"}}]
            }
        });
        let body = workflow_body(
            &raw,
            &TemplateRef::namespaced("build-template"),
            &[json!({"name": "branch", "value": "dev", "enum": ["main", "dev"]})],
            "ci",
        );

        assert_eq!(body["kind"], "Workflow");
        assert_eq!(body["apiVersion"], "argoproj.io/v1alpha1");
        assert_eq!(body["metadata"]["generateName"], "build-template-");
        assert!(body["metadata"].get("name").is_none());
        assert_eq!(body["metadata"]["namespace"], "ci");
        assert_eq!(body["metadata"]["labels"][TEMPLATE_LABEL], "build-template");
        assert_eq!(body["metadata"]["labels"][MANAGED_BY_LABEL], MANAGER);
        assert_eq!(body["spec"]["entrypoint"], "main");
        assert_eq!(body["spec"]["templates"], raw["spec"]["templates"]);
        assert_eq!(body["spec"]["arguments"]["artifacts"], raw["spec"]["arguments"]["artifacts"]);
        assert_eq!(
            body["spec"]["arguments"]["parameters"],
            json!([{"name": "branch", "value": "dev", "enum": ["main", "dev"]}])
        );
    }

    #[test]
    fn test_workflow_body_cluster_label_and_no_arguments() {
        let raw = json!({"spec": {"entrypoint": "main"}});
        let body = workflow_body(&raw, &TemplateRef::cluster("shared"), &[], "ci");

        assert_eq!(body["metadata"]["labels"][CLUSTER_TEMPLATE_LABEL], "shared");
        assert!(body["metadata"]["labels"].get(TEMPLATE_LABEL).is_none());
        assert!(body["spec"].get("arguments").is_none());
    }
}

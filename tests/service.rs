//! Service Integration Tests
//!
//! Workflow reads and writes through the service facade, including
//! error mapping and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{service, workflow_doc, StubResourceClient, NAMESPACE};
use flowbridge::adapters::ResourceKind;
use flowbridge::{with_cancellation, ClientError, LabelSelector, Phase};

#[tokio::test]
async fn test_get_missing_workflow_is_not_found() {
    let stub = Arc::new(StubResourceClient::new());

    let err = service(&stub)
        .get_workflow(Some("ci"), "missing-flow")
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::not_found("Workflow", "missing-flow"));
    assert_eq!(err.http_status(), 404);
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn test_get_uses_configured_namespace() {
    let stub = Arc::new(StubResourceClient::new());
    stub.insert_workflow(workflow_doc("flow-1", "Running"));

    let wf = service(&stub).get_workflow(None, "flow-1").await.unwrap();

    assert_eq!(wf.name(), "flow-1");
    assert_eq!(wf.phase(), Phase::Running);
    assert!(wf.status.is_active());
    assert_eq!(stub.calls_to("get")[0].namespace, NAMESPACE);
}

#[tokio::test]
async fn test_empty_name_is_rejected_without_calls() {
    let stub = Arc::new(StubResourceClient::new());

    let err = service(&stub).get_workflow(None, " ").await.unwrap_err();

    assert!(matches!(err, ClientError::InvalidInput(_)));
    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn test_list_with_selector() {
    let stub = Arc::new(StubResourceClient::new());
    stub.insert_workflow(workflow_doc("flow-1", "Running"));
    let mut other = workflow_doc("flow-2", "Running");
    other["metadata"]["labels"] = json!({"team": "data"});
    stub.insert_workflow(other);

    let svc = service(&stub);
    let selector = LabelSelector::parse("team=ci").unwrap();
    let filtered = svc.list_workflows(None, Some(&selector)).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].name(), "flow-1");

    let all = svc.list_workflows(None, None).await.unwrap();
    assert_eq!(all.len(), 2);

    let lists = stub.calls_to("list");
    assert_eq!(lists[0].selector.as_deref(), Some("team=ci"));
    assert!(lists[1].selector.is_none());
}

#[tokio::test]
async fn test_list_skips_unreadable_documents() {
    let stub = Arc::new(StubResourceClient::new());
    stub.insert_workflow(workflow_doc("flow-1", "Succeeded"));
    stub.insert(&ResourceKind::WORKFLOW, NAMESPACE, json!(["garbage"]));

    let all = service(&stub).list_workflows(None, None).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_create_from_raw_body() {
    let stub = Arc::new(StubResourceClient::new());
    let body = json!({
        "metadata": {"generateName": "hello-"},
        "spec": {
            "entrypoint": "main",
            "templates": [{"name": "main", "container": {"image": "busybox"}}]
        }
    });

    let wf = service(&stub).create_workflow(None, body).await.unwrap();

    assert!(wf.name().starts_with("hello-"));
    assert_eq!(wf.meta.namespace, NAMESPACE);
    assert_eq!(wf.spec.entrypoint, "main");
    assert!(!wf.meta.uid.is_empty());

    let stored = stub.stored(&ResourceKind::WORKFLOW, NAMESPACE);
    assert_eq!(stored[0]["kind"], "Workflow");
    assert_eq!(stored[0]["apiVersion"], "argoproj.io/v1alpha1");
}

#[tokio::test]
async fn test_create_honours_document_namespace() {
    let stub = Arc::new(StubResourceClient::new());
    let body = json!({"metadata": {"name": "fixed", "namespace": "data"}, "spec": {}});

    let wf = service(&stub).create_workflow(None, body).await.unwrap();

    assert_eq!(wf.meta.namespace, "data");
    assert_eq!(stub.calls_to("create")[0].namespace, "data");
}

#[tokio::test]
async fn test_create_rejects_invalid_bodies() {
    let stub = Arc::new(StubResourceClient::new());
    let svc = service(&stub);

    let wrong_kind = json!({"kind": "CronWorkflow", "metadata": {"name": "x"}, "spec": {}});
    let no_identity = json!({"metadata": {"labels": {"a": "b"}}, "spec": {}});

    for body in [json!("text"), wrong_kind, no_identity] {
        let err = svc.create_workflow(None, body).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidInput(_)));
    }
    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn test_delete_then_get() {
    let stub = Arc::new(StubResourceClient::new());
    stub.insert_workflow(workflow_doc("flow-1", "Succeeded"));
    let svc = service(&stub);

    svc.delete_workflow(None, "flow-1").await.unwrap();

    assert!(svc.get_workflow(None, "flow-1").await.unwrap_err().is_not_found());
    assert!(svc.delete_workflow(None, "flow-1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_cancellation_interrupts_stalled_call() {
    let stub = Arc::new(StubResourceClient::new());
    stub.stall(&ResourceKind::WORKFLOW);
    let svc = service(&stub);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        with_cancellation(&token, svc.list_workflows(None, None)),
    )
    .await
    .expect("cancellation did not interrupt the call");

    assert_eq!(result.unwrap_err(), ClientError::Cancelled);
    assert_eq!(stub.calls_to("list").len(), 1);
}

#[tokio::test]
async fn test_uncancelled_operation_completes() {
    let stub = Arc::new(StubResourceClient::new());
    stub.insert_workflow(workflow_doc("flow-1", "Pending"));
    let svc = service(&stub);

    let token = CancellationToken::new();
    let wf = with_cancellation(&token, svc.get_workflow(None, "flow-1"))
        .await
        .unwrap();
    assert_eq!(wf.phase(), Phase::Pending);
}

//! Workflow engine HTTP API adapter.
//!
//! Endpoint: {base}/api/v1/workflows/{namespace}/{name}[/log|/retry|/stop]
//! Auth: Bearer token

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::RawResource;
use crate::config::EngineConfig;
use crate::error::{ClientError, Result};

/// One entry of the engine's newline-delimited log stream
#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(default)]
    result: Option<LogChunk>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct LogChunk {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    http_code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// Error body returned by the engine API
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the workflow engine's own HTTP API
#[derive(Clone)]
pub struct ArgoServerClient {
    client: Client,
    base_url: String,
    token: String,
    log_timeout: Duration,
}

impl ArgoServerClient {
    /// Create a new client
    pub fn new(
        engine: &EngineConfig,
        request_timeout: Duration,
        log_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create engine HTTP client")?;

        Ok(Self {
            client,
            base_url: engine.base_url.trim_end_matches('/').to_string(),
            token: engine.token.clone(),
            log_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn workflow_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/api/v1/workflows/{}/{}", self.base_url, namespace, name)
    }

    /// Engine tokens are often stored with their scheme already attached
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let value = if self.token.starts_with("Bearer ") {
            self.token.clone()
        } else {
            format!("Bearer {}", self.token)
        };
        request.header("Authorization", value)
    }

    async fn send(&self, request: RequestBuilder, name: &str) -> Result<Response> {
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(engine_error(status, &body, name))
    }

    /// Fetch a workflow document as the engine reports it
    pub async fn get_workflow(&self, namespace: &str, name: &str) -> Result<RawResource> {
        let url = self.workflow_url(namespace, name);
        debug!(%url, "Getting workflow from engine");
        let workflow: Value = self.send(self.client.get(&url), name).await?.json().await?;
        Ok(workflow)
    }

    /// Fetch log lines for a workflow, optionally scoped to one pod
    pub async fn workflow_logs(
        &self,
        namespace: &str,
        name: &str,
        pod: Option<&str>,
        container: &str,
    ) -> Result<Vec<String>> {
        let url = format!("{}/log", self.workflow_url(namespace, name));
        debug!(%url, pod = ?pod, container, "Fetching engine logs");

        let mut query = vec![("logOptions.container", container.to_string())];
        if let Some(pod) = pod {
            query.push(("podName", pod.to_string()));
        }

        let request = self.client.get(&url).query(&query).timeout(self.log_timeout);
        let body = self.send(request, name).await?.text().await?;
        parse_log_stream(&body, name)
    }

    /// Ask the engine to rerun the failed parts of a workflow in place
    pub async fn retry(&self, namespace: &str, name: &str) -> Result<RawResource> {
        let url = format!("{}/retry", self.workflow_url(namespace, name));
        let request = self
            .client
            .put(&url)
            .json(&json!({ "name": name, "namespace": namespace }));

        let workflow: Value = self.send(request, name).await?.json().await?;
        info!(namespace, name, "Workflow retry requested via engine");
        Ok(workflow)
    }

    /// Ask the engine to stop a running workflow
    pub async fn stop(&self, namespace: &str, name: &str) -> Result<RawResource> {
        let url = format!("{}/stop", self.workflow_url(namespace, name));
        let request = self
            .client
            .put(&url)
            .json(&json!({ "name": name, "namespace": namespace }));

        let workflow: Value = self.send(request, name).await?.json().await?;
        info!(namespace, name, "Workflow stop requested via engine");
        Ok(workflow)
    }
}

fn engine_error(status: StatusCode, body: &str, name: &str) -> ClientError {
    let detail = serde_json::from_str::<ApiError>(body)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .unwrap_or_else(|| body.trim().to_string());

    match status.as_u16() {
        404 => ClientError::not_found("Workflow", name),
        400 | 409 | 412 | 422 => ClientError::InvalidInput(detail),
        429 | 500..=599 => {
            ClientError::Unavailable(format!("Engine returned {}: {}", status, detail))
        }
        _ => ClientError::Internal(format!("Engine returned {}: {}", status, detail)),
    }
}

/// Turn the newline-delimited JSON log stream into plain lines
///
/// Lines that are not JSON are passed through as text.
fn parse_log_stream(body: &str, name: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    for raw in body.lines().filter(|l| !l.trim().is_empty()) {
        let entry = match serde_json::from_str::<LogEntry>(raw) {
            Ok(entry) => entry,
            Err(_) => {
                lines.push(raw.to_string());
                continue;
            }
        };

        if let Some(err) = entry.error {
            return Err(match err.http_code {
                Some(404) => ClientError::not_found("Workflow", name),
                _ => ClientError::Unavailable(format!("Engine log stream failed: {}", err.message)),
            });
        }
        if let Some(chunk) = entry.result {
            lines.extend(chunk.content.lines().map(str::to_string));
        }
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(base_url: &str, token: &str) -> ArgoServerClient {
        let config = EngineConfig {
            base_url: base_url.to_string(),
            token: token.to_string(),
        };
        ArgoServerClient::new(&config, Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_log_stream() {
        let body = concat!(
            r#"{"result":{"content":"cloning repo","podName":"flow-1-1"}}"#,
            "\n",
            r#"{"result":{"content":"build ok","podName":"flow-1-2"}}"#,
            "\n\n",
            "plain text line\n"
        );

        let lines = parse_log_stream(body, "flow-1").unwrap();
        assert_eq!(lines, vec!["cloning repo", "build ok", "plain text line"]);
    }

    #[test]
    fn test_parse_log_stream_error_entry() {
        let body = r#"{"error":{"grpc_code":5,"http_code":404,"message":"not found"}}"#;
        assert!(parse_log_stream(body, "flow-1").unwrap_err().is_not_found());

        let body = r#"{"error":{"http_code":500,"message":"pod gone"}}"#;
        assert!(matches!(
            parse_log_stream(body, "flow-1"),
            Err(ClientError::Unavailable(_))
        ));
    }

    #[test]
    fn test_engine_error_mapping() {
        let body = r#"{"code":9,"message":"workflow must be Failed/Error to retry"}"#;
        assert_eq!(
            engine_error(StatusCode::CONFLICT, body, "flow-1"),
            ClientError::InvalidInput("workflow must be Failed/Error to retry".to_string())
        );
        assert!(engine_error(StatusCode::NOT_FOUND, "", "flow-1").is_not_found());
        assert!(matches!(
            engine_error(StatusCode::UNAUTHORIZED, "", "flow-1"),
            ClientError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn test_token_scheme_is_not_duplicated() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/v1/workflows/ci/flow-1/stop")
            .match_header("authorization", "Bearer v2:abc")
            .with_status(200)
            .with_body(r#"{"metadata":{"name":"flow-1"}}"#)
            .create_async()
            .await;

        let client = engine(&server.url(), "Bearer v2:abc");
        client.stop("ci", "flow-1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_workflow() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/workflows/ci/flow-1")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"metadata":{"name":"flow-1"},"status":{"phase":"Running"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/workflows/ci/ghost")
            .with_status(404)
            .with_body(r#"{"code":5,"message":"not found"}"#)
            .create_async()
            .await;

        let client = engine(&server.url(), "secret");
        let workflow = client.get_workflow("ci", "flow-1").await.unwrap();
        assert_eq!(workflow["status"]["phase"], "Running");

        let err = client.get_workflow("ci", "ghost").await.unwrap_err();
        assert_eq!(err, ClientError::not_found("Workflow", "ghost"));
    }

    #[tokio::test]
    async fn test_workflow_logs_scoped_to_pod() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/workflows/ci/flow-1/log")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("logOptions.container".into(), "main".into()),
                mockito::Matcher::UrlEncoded("podName".into(), "flow-1-build".into()),
            ]))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body("{\"result\":{\"content\":\"compiling\"}}\n")
            .create_async()
            .await;

        let client = engine(&server.url(), "secret");
        let lines = client
            .workflow_logs("ci", "flow-1", Some("flow-1-build"), "main")
            .await
            .unwrap();

        assert_eq!(lines, vec!["compiling"]);
        mock.assert_async().await;
    }
}

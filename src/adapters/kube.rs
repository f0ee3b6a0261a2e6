//! Kubernetes REST adapter.
//!
//! Talks to the API server directly over HTTPS with a bearer token. Paths
//! follow the standard convention:
//! - core group: `/api/v1[/namespaces/{ns}]/{plural}`
//! - named groups: `/apis/{group}/{version}[/namespaces/{ns}]/{plural}`

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{LabelSelector, RawResource, ResourceClient, ResourceKind};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Subset of the Kubernetes `Status` object returned with failures
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Resource client backed by the Kubernetes REST API
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    log_timeout: Duration,
}

impl KubeClient {
    /// Build a client from resolved configuration
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().timeout(config.request_timeout);

        if let Some(ref ca) = config.cluster.ca {
            let pem = ca.pem()?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .context("Failed to parse cluster CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        if config.cluster.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.cluster.api_url.trim_end_matches('/').to_string(),
            token: config.cluster.token.clone(),
            log_timeout: config.log_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a resource collection, namespaced when `namespace` is given
    fn collection_url(&self, kind: &ResourceKind, namespace: Option<&str>) -> String {
        let prefix = if kind.group.is_empty() {
            format!("{}/api/{}", self.base_url, kind.version)
        } else {
            format!("{}/apis/{}/{}", self.base_url, kind.group, kind.version)
        };
        match namespace {
            Some(ns) => format!("{}/namespaces/{}/{}", prefix, ns, kind.plural),
            None => format!("{}/{}", prefix, kind.plural),
        }
    }

    fn item_url(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}", self.collection_url(kind, namespace), name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and turn non-success statuses into typed errors
    async fn send(
        &self,
        request: RequestBuilder,
        kind: &ResourceKind,
        name: &str,
    ) -> Result<Response> {
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, kind, name))
    }

    async fn list_at(
        &self,
        url: String,
        kind: &ResourceKind,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>> {
        debug!(%url, selector = ?selector.map(|s| s.to_string()), "Listing resources");

        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            request = request.query(&[("labelSelector", selector.to_string())]);
        }

        let list: Value = self.send(request, kind, &url).await?.json().await?;
        match list.get("items") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(ClientError::Internal(format!(
                "{} list response has a non-array 'items' field",
                kind
            ))),
        }
    }
}

/// Map a failed response to the error taxonomy
fn status_error(status: StatusCode, body: &str, kind: &ResourceKind, name: &str) -> ClientError {
    let detail = serde_json::from_str::<ApiStatus>(body)
        .ok()
        .and_then(|s| s.message.or(s.reason))
        .unwrap_or_else(|| body.trim().to_string());

    match status.as_u16() {
        404 => kind.not_found(name),
        400 | 409 | 422 => ClientError::InvalidInput(detail),
        429 | 500..=599 => {
            ClientError::Unavailable(format!("API server returned {}: {}", status, detail))
        }
        _ => ClientError::Internal(format!("API server returned {}: {}", status, detail)),
    }
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>> {
        let url = self.collection_url(kind, Some(namespace));
        self.list_at(url, kind, selector).await
    }

    async fn list_cluster(
        &self,
        kind: &ResourceKind,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RawResource>> {
        let url = self.collection_url(kind, None);
        self.list_at(url, kind, selector).await
    }

    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<RawResource> {
        let url = self.item_url(kind, Some(namespace), name);
        debug!(%url, "Getting resource");
        let response = self.send(self.client.get(&url), kind, name).await?;
        Ok(response.json().await?)
    }

    async fn get_cluster(&self, kind: &ResourceKind, name: &str) -> Result<RawResource> {
        let url = self.item_url(kind, None, name);
        debug!(%url, "Getting cluster resource");
        let response = self.send(self.client.get(&url), kind, name).await?;
        Ok(response.json().await?)
    }

    async fn create(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        body: &RawResource,
    ) -> Result<RawResource> {
        let url = self.collection_url(kind, Some(namespace));
        let label = body
            .pointer("/metadata/name")
            .or_else(|| body.pointer("/metadata/generateName"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let response = self
            .send(self.client.post(&url).json(body), kind, &label)
            .await?;
        let created: Value = response.json().await?;
        let created_name = created
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        info!(kind = kind.kind, namespace, name = created_name, "Created resource");
        Ok(created)
    }

    async fn delete(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let url = self.item_url(kind, Some(namespace), name);
        let request = self
            .client
            .delete(&url)
            .query(&[("propagationPolicy", "Background")]);
        self.send(request, kind, name).await?;

        info!(kind = kind.kind, namespace, name, "Deleted resource");
        Ok(())
    }

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<RawResource> {
        let url = self.item_url(kind, Some(namespace), name);
        let request = self
            .client
            .patch(&url)
            .header(CONTENT_TYPE, "application/merge-patch+json")
            .body(serde_json::to_vec(patch)?);

        let response = self.send(request, kind, name).await?;
        info!(kind = kind.kind, namespace, name, "Patched resource");
        Ok(response.json().await?)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let url = format!("{}/log", self.item_url(&ResourceKind::POD, Some(namespace), pod));
        debug!(%url, container, "Reading pod logs");

        let request = self
            .client
            .get(&url)
            .query(&[("container", container)])
            .timeout(self.log_timeout);
        let response = self.send(request, &ResourceKind::POD, pod).await?;
        Ok(response.text().await?)
    }
}

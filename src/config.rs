//! Client configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FLOWBRIDGE_NAMESPACE, KUBE_API_URL, ARGO_SERVER_URL, ...)
//! 2. Config file (.flowbridge/config.yaml, or an explicit path)
//! 3. In-cluster service account (when running inside a pod)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .flowbridge/config.yaml
//! - Relative file paths in the config file resolve against the .flowbridge/ directory
//!
//! The resolved [`ClientConfig`] is built once at startup and handed to the
//! components that need it. It is never mutated afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, warn};

const DEFAULT_NAMESPACE: &str = "argo";
const DEFAULT_API_URL: &str = "https://kubernetes.default.svc";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LOG_CONTAINER: &str = "main";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    /// Target namespace for workflow operations
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub engine: Option<EngineSection>,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub logs: LogSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSection {
    pub api_url: Option<String>,
    pub token: Option<String>,
    /// File containing the bearer token (relative to .flowbridge/)
    pub token_file: Option<String>,
    /// Base64-encoded PEM bundle
    pub ca_data: Option<String>,
    /// PEM bundle path (relative to .flowbridge/)
    pub ca_file: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSection {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutSection {
    pub request_seconds: Option<u64>,
    pub log_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSection {
    pub container: Option<String>,
}

/// Certificate authority material for the cluster API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaBundle {
    /// Base64-encoded PEM, as found in kubeconfig `certificate-authority-data`
    Inline(String),
    /// Path to a PEM file
    File(PathBuf),
}

impl CaBundle {
    /// Raw PEM bytes
    pub fn pem(&self) -> Result<Vec<u8>> {
        match self {
            CaBundle::Inline(data) => base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .context("CA data is not valid base64"),
            CaBundle::File(path) => std::fs::read(path)
                .with_context(|| format!("Failed to read CA file: {}", path.display())),
        }
    }
}

/// Connection settings for the cluster control plane
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub ca: Option<CaBundle>,
    pub insecure_skip_tls_verify: bool,
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca", &self.ca)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

/// Engine-native HTTP API settings (optional)
#[derive(Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub base_url: String,
    pub token: String,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolved, immutable client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Namespace used when an operation does not name one
    pub namespace: String,
    pub cluster: ClusterConfig,
    /// Present only when both engine URL and token resolve
    pub engine: Option<EngineConfig>,
    /// Bound on every control plane call
    pub request_timeout: Duration,
    /// Bound on log reads, which stream more data
    pub log_timeout: Duration,
    /// Container whose logs are read
    pub log_container: String,
    /// Path to config file (if one was used)
    pub config_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Configuration for a given namespace and API URL, everything else defaulted.
    pub fn new(namespace: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster: ClusterConfig {
                api_url: api_url.into(),
                token: None,
                ca: None,
                insecure_skip_tls_verify: false,
            },
            engine: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            log_timeout: Duration::from_secs(DEFAULT_LOG_TIMEOUT_SECS),
            log_container: DEFAULT_LOG_CONTAINER.to_string(),
            config_file: None,
        }
    }

    /// Attach engine-native settings
    pub fn with_engine(mut self, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        self.engine = Some(EngineConfig {
            base_url: base_url.into(),
            token: token.into(),
        });
        self
    }

    /// Load configuration from the process environment, the discovered
    /// config file and the in-cluster service account.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config_file = match explicit_path {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let file = match config_file {
            Some(ref path) => Some(load_config_file(path)?),
            None => None,
        };

        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let in_cluster = detect_in_cluster(&env);

        let config = resolve(file.as_ref(), config_file.as_deref(), &env, in_cluster)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no request could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            anyhow::bail!("Namespace cannot be empty");
        }
        check_url("cluster API URL", &self.cluster.api_url)?;
        if let Some(ref engine) = self.engine {
            check_url("engine URL", &engine.base_url)?;
        }
        if self.request_timeout.is_zero() || self.log_timeout.is_zero() {
            anyhow::bail!("Timeouts must be greater than zero");
        }
        if self.log_container.trim().is_empty() {
            anyhow::bail!("Log container name cannot be empty");
        }
        Ok(())
    }

    /// Whether log reads and lifecycle calls go through the engine API
    pub fn uses_engine(&self) -> bool {
        self.engine.is_some()
    }
}

fn check_url(label: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        anyhow::bail!("Invalid {}: '{}' (expected http:// or https://)", label, url)
    }
}

/// Service account mounted into a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InClusterAccount {
    pub api_url: String,
    pub token: String,
    pub ca_file: Option<PathBuf>,
    pub namespace: Option<String>,
}

/// Detect the in-cluster service account, if any
fn detect_in_cluster(env: &dyn Fn(&str) -> Option<String>) -> Option<InClusterAccount> {
    let host = env("KUBERNETES_SERVICE_HOST")?;
    let port = env("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());
    let dir = Path::new(SERVICE_ACCOUNT_DIR);

    let token = match std::fs::read_to_string(dir.join("token")) {
        Ok(token) => token.trim().to_string(),
        Err(e) => {
            debug!(error = %e, "No service account token, skipping in-cluster config");
            return None;
        }
    };

    let ca_path = dir.join("ca.crt");
    let ca_file = ca_path.exists().then_some(ca_path);
    let namespace = std::fs::read_to_string(dir.join("namespace"))
        .ok()
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty());

    // IPv6 service hosts need brackets in URLs
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host
    };

    Some(InClusterAccount {
        api_url: format!("https://{}:{}", host, port),
        token,
        ca_file,
        namespace,
    })
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".flowbridge").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    // Fall back to the per-user config
    let home_config = dirs::home_dir()?.join(".flowbridge").join("config.yaml");
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Combine all sources into a single configuration
fn resolve(
    file: Option<&ConfigFile>,
    file_path: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
    in_cluster: Option<InClusterAccount>,
) -> Result<ClientConfig> {
    let empty = ConfigFile::default();
    let file = file.unwrap_or(&empty);
    let base_dir = file_path
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."));

    let namespace = env("FLOWBRIDGE_NAMESPACE")
        .or_else(|| file.namespace.clone())
        .or_else(|| in_cluster.as_ref().and_then(|a| a.namespace.clone()))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let api_url = env("KUBE_API_URL")
        .or_else(|| file.cluster.api_url.clone())
        .or_else(|| in_cluster.as_ref().map(|a| a.api_url.clone()))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let mut token = env("KUBE_TOKEN").or_else(|| file.cluster.token.clone());
    // The token file is only read when nothing above it resolved
    if token.is_none() {
        if let Some(ref token_file) = file.cluster.token_file {
            let path = resolve_path(base_dir, token_file);
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read token file: {}", path.display()))?;
            token = Some(contents.trim().to_string());
        }
    }
    let token = token.or_else(|| in_cluster.as_ref().map(|a| a.token.clone()));

    let ca = env("KUBE_CA_DATA")
        .map(CaBundle::Inline)
        .or_else(|| env("KUBE_CA_FILE").map(|p| CaBundle::File(PathBuf::from(p))))
        .or_else(|| file.cluster.ca_data.clone().map(CaBundle::Inline))
        .or_else(|| {
            file.cluster
                .ca_file
                .as_ref()
                .map(|p| CaBundle::File(resolve_path(base_dir, p)))
        })
        .or_else(|| {
            in_cluster
                .as_ref()
                .and_then(|a| a.ca_file.clone())
                .map(CaBundle::File)
        });

    let insecure_skip_tls_verify = env("KUBE_INSECURE_SKIP_TLS_VERIFY")
        .and_then(|v| parse_bool(&v))
        .or(file.cluster.insecure_skip_tls_verify)
        .unwrap_or(false);

    let engine_section = file.engine.clone().unwrap_or_default();
    let engine_url = env("ARGO_SERVER_URL").or(engine_section.base_url);
    let engine_token = env("ARGO_TOKEN").or(engine_section.token);
    let engine = match (engine_url, engine_token) {
        (Some(base_url), Some(token)) => Some(EngineConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }),
        (Some(base_url), None) => {
            warn!(%base_url, "Engine URL configured without a token, using cluster-native paths");
            None
        }
        _ => None,
    };

    let request_secs = match env("FLOWBRIDGE_REQUEST_TIMEOUT_SECS") {
        Some(v) => Some(
            v.trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid FLOWBRIDGE_REQUEST_TIMEOUT_SECS: {}", v))?,
        ),
        None => file.timeouts.request_seconds,
    };

    Ok(ClientConfig {
        namespace,
        cluster: ClusterConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            ca,
            insecure_skip_tls_verify,
        },
        engine,
        request_timeout: Duration::from_secs(
            request_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        ),
        log_timeout: Duration::from_secs(
            file.timeouts.log_seconds.unwrap_or(DEFAULT_LOG_TIMEOUT_SECS),
        ),
        log_container: file
            .logs
            .container
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_CONTAINER.to_string()),
        config_file: file_path.map(Path::to_path_buf),
    })
}

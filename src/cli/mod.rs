//! Command-line interface for flowbridge.
//!
//! Provides commands for listing, inspecting, submitting and controlling
//! workflows, reading their logs, and summarizing a namespace. Results are
//! printed to stdout as pretty JSON unless a table is requested; logs go
//! to stderr.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::adapters::LabelSelector;
use crate::config::ClientConfig;
use crate::core::{with_cancellation, WorkflowService};
use crate::domain::{TemplateRef, TemplateScope, Workflow, WorkflowTemplate};

/// flowbridge - Client for cluster-resident workflow runs
#[derive(Parser, Debug)]
#[command(name = "flowbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: .flowbridge/config.yaml, searched upwards)
    #[arg(long, global = true, env = "FLOWBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Namespace to operate in (default: the configured namespace)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Output format for resource listings
    #[arg(short, long, global = true, value_enum, default_value = "json")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List workflows
    List {
        /// Label selector (key=value,key2=value2)
        #[arg(short = 'l', long)]
        selector: Option<String>,
    },

    /// Show one workflow
    Get {
        /// Workflow name
        name: String,
    },

    /// Create a workflow from a YAML or JSON document
    Create {
        /// Workflow manifest
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Submit a workflow from a template
    Submit {
        /// Template name
        template: String,

        /// Argument as name=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Use a cluster-scoped template
        #[arg(long)]
        cluster: bool,
    },

    /// Retry a failed workflow
    Retry {
        /// Workflow name
        name: String,
    },

    /// Stop a running workflow
    Stop {
        /// Workflow name
        name: String,
    },

    /// Delete a workflow
    Delete {
        /// Workflow name
        name: String,
    },

    /// Print workflow logs
    Logs {
        /// Workflow name
        name: String,

        /// Only this step (node id, name, display name or template name)
        #[arg(long)]
        step: Option<String>,
    },

    /// List namespaced and cluster templates
    Templates,

    /// Workflow counts by phase
    Stats {
        /// One count per distinct phase instead of the summary buckets
        #[arg(long)]
        detailed: bool,
    },

    /// Statistics, active workflows and templates in one view
    Overview,

    /// Show resolved configuration
    Config,
}

/// How listings are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = ClientConfig::load(self.config.as_deref())?;
        if let Commands::Config = self.command {
            show_config(&config);
            return Ok(());
        }

        let service = WorkflowService::from_config(config)?;
        let token = cancel_on_interrupt();
        let ns = self.namespace.as_deref();

        match self.command {
            Commands::List { selector } => {
                let selector = selector
                    .as_deref()
                    .map(LabelSelector::parse)
                    .transpose()?;
                let workflows =
                    with_cancellation(&token, service.list_workflows(ns, selector.as_ref()))
                        .await?;
                match self.output {
                    OutputFormat::Json => print_json(&workflows),
                    OutputFormat::Table => {
                        print_workflow_table(&workflows);
                        Ok(())
                    }
                }
            }
            Commands::Get { name } => {
                let workflow = with_cancellation(&token, service.get_workflow(ns, &name)).await?;
                print_json(&workflow)
            }
            Commands::Create { file } => {
                let body = read_manifest(&file).await?;
                let workflow =
                    with_cancellation(&token, service.create_workflow(ns, body)).await?;
                eprintln!("Created workflow {}", workflow.name());
                print_json(&workflow)
            }
            Commands::Submit {
                template,
                params,
                cluster,
            } => {
                let template_ref = if cluster {
                    TemplateRef::cluster(template)
                } else {
                    TemplateRef::namespaced(template)
                };
                let parameters = parse_params(&params)?;
                let workflow = with_cancellation(
                    &token,
                    service.submit_from_template(&template_ref, &parameters, ns),
                )
                .await?;
                eprintln!("Submitted workflow {}", workflow.name());
                print_json(&workflow)
            }
            Commands::Retry { name } => {
                let workflow =
                    with_cancellation(&token, service.retry_workflow(ns, &name)).await?;
                print_json(&workflow)
            }
            Commands::Stop { name } => {
                let workflow =
                    with_cancellation(&token, service.stop_workflow(ns, &name)).await?;
                print_json(&workflow)
            }
            Commands::Delete { name } => {
                with_cancellation(&token, service.delete_workflow(ns, &name)).await?;
                eprintln!("Deleted workflow {}", name);
                Ok(())
            }
            Commands::Logs { name, step } => {
                let text = with_cancellation(
                    &token,
                    service.workflow_logs(ns, &name, step.as_deref()),
                )
                .await?;
                if !text.is_empty() {
                    println!("{}", text);
                }
                Ok(())
            }
            Commands::Templates => {
                let catalog = with_cancellation(&token, service.template_catalog(ns)).await?;
                match self.output {
                    OutputFormat::Json => print_json(&catalog),
                    OutputFormat::Table => {
                        let all: Vec<&WorkflowTemplate> =
                            catalog.namespaced.iter().chain(&catalog.cluster).collect();
                        print_template_table(&all);
                        Ok(())
                    }
                }
            }
            Commands::Stats { detailed } => {
                if detailed {
                    let counts = with_cancellation(&token, service.phase_counts(ns)).await?;
                    print_json(&counts)
                } else {
                    let stats = with_cancellation(&token, service.statistics(ns)).await?;
                    print_json(&stats)
                }
            }
            Commands::Overview => {
                let overview = with_cancellation(&token, service.overview(ns)).await?;
                print_json(&overview)
            }
            Commands::Config => Ok(()),
        }
    }
}

/// Cancellation token fired by Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

/// Parse `name=value` arguments; later duplicates win
fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for item in raw {
        let Some((name, value)) = item.split_once('=') else {
            bail!("Parameter '{}' must be given as name=value", item);
        };
        if name.trim().is_empty() {
            bail!("Parameter '{}' has an empty name", item);
        }
        params.insert(name.trim().to_string(), value.to_string());
    }
    Ok(params)
}

/// Read a manifest; YAML parsing covers JSON too
async fn read_manifest(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width - 3).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn print_workflow_table(workflows: &[Workflow]) {
    if workflows.is_empty() {
        println!("No workflows found");
        return;
    }

    println!("{:<45} {:<10} {:<22} {:<8}", "NAME", "PHASE", "STARTED", "PROGRESS");
    println!("{}", "-".repeat(88));

    for wf in workflows {
        let started = wf
            .status
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<45} {:<10} {:<22} {:<8}",
            truncate(wf.name(), 45),
            wf.phase().to_string(),
            started,
            wf.status.progress.as_deref().unwrap_or("-")
        );
    }

    println!("\nTotal: {} workflows", workflows.len());
}

fn print_template_table(templates: &[&WorkflowTemplate]) {
    if templates.is_empty() {
        println!("No templates found");
        return;
    }

    println!("{:<10} {:<40} {:<20} {:<20}", "SCOPE", "NAME", "ENTRYPOINT", "REQUIRED");
    println!("{}", "-".repeat(92));

    for template in templates {
        let scope = match template.scope {
            TemplateScope::Namespaced => "namespace",
            TemplateScope::Cluster => "cluster",
        };
        println!(
            "{:<10} {:<40} {:<20} {:<20}",
            scope,
            truncate(template.name(), 40),
            truncate(&template.entrypoint, 20),
            template.required_parameters().join(",")
        );
    }
}

fn show_config(config: &ClientConfig) {
    println!("flowbridge configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using environment and defaults)".to_string())
    );
    println!("Namespace:   {}", config.namespace);
    println!();
    println!("Cluster:");
    println!("  API URL:        {}", config.cluster.api_url);
    println!(
        "  Token:          {}",
        if config.cluster.token.is_some() { "(set)" } else { "(none)" }
    );
    println!(
        "  CA bundle:      {}",
        if config.cluster.ca.is_some() { "(set)" } else { "(system roots)" }
    );
    if config.cluster.insecure_skip_tls_verify {
        println!("  TLS verify:     disabled");
    }
    println!();
    match &config.engine {
        Some(engine) => {
            println!("Engine API:     {}", engine.base_url);
            println!("Logs/control:   engine-native");
        }
        None => println!("Logs/control:   cluster-native"),
    }
    println!();
    println!("Timeouts:");
    println!("  Request:  {}s", config.request_timeout.as_secs());
    println!("  Logs:     {}s", config.log_timeout.as_secs());
    println!("Log container: {}", config.log_container);
}

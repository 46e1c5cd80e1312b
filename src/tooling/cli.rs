//! CLI Tooling
//!
//! Command-line inspection and maintenance of a broker's durable state:
//! contexts, registered agents, expiry sweeps and the effective configuration.

use crate::agent::{Agent, AgentRegistry, AgentStatus};
use crate::config::BrokerConfig;
use crate::context::{Context, ContextManager};
use crate::error::{ApiError, StorageError};
use crate::logging::LoggingConfig;
use crate::storage::{AgentFilters, ContextFilters, SledAgentStore, SledBlobStore, SledContextStore};
use crate::sweeper::{ExpirySweeper, SweepReport};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// ACB CLI - Agent context broker administration
#[derive(Parser)]
#[command(name = "acb")]
#[command(about = "Inspect and maintain agent context broker state")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging settings from `base` with command-line overrides applied.
    /// Without `--verbose` or an explicit level, logging stays off.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        config.enabled = self.verbose || self.log_level.is_some();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        } else if self.verbose {
            config.level = "debug".to_string();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or delete stored contexts
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    /// Inspect registered agents
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Remove expired contexts and mark silent agents offline
    Sweep {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ContextCommands {
    /// Show one context
    Get {
        /// Context ID
        id: String,
        /// Include the payload (hex) in the output
        #[arg(long)]
        payload: bool,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List contexts, newest first
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long = "type")]
        context_type: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value = "0")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Delete a context
    Delete {
        /// Context ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// List registered agents
    List {
        #[arg(long = "type")]
        agent_type: Option<String>,
        #[arg(long)]
        capability: Option<String>,
        /// online, offline or unknown
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// CLI context for executing commands against the sled-backed stores.
pub struct CliContext {
    config: BrokerConfig,
    manager: Arc<ContextManager>,
    registry: Arc<AgentRegistry>,
}

impl CliContext {
    /// Open storage at the locations named by `config`.
    pub fn with_config(config: BrokerConfig) -> Result<Self, ApiError> {
        let (data_path, blob_path) = config.storage.resolve_paths()?;
        for dir in [&data_path, &blob_path] {
            std::fs::create_dir_all(dir).map_err(|e| ApiError::StorageError(StorageError::IoError(e)))?;
        }

        let db = sled::open(&data_path).map_err(|e| ApiError::StorageError(StorageError::Sled(e)))?;
        let contexts = Arc::new(SledContextStore::from_db(&db)?);
        let agents = Arc::new(SledAgentStore::from_db(&db)?);
        let blobs = Arc::new(SledBlobStore::new(&blob_path)?);

        let manager = Arc::new(ContextManager::new(contexts, &config).with_blob_store(blobs));
        let registry = Arc::new(AgentRegistry::new(agents, &config));
        info!(data_path = %data_path.display(), "Opened broker storage");

        Ok(Self {
            config,
            manager,
            registry,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ContextManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Execute a command and return its rendered output.
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Context { command } => self.execute_context(command).await,
            Commands::Agent { command } => self.execute_agent(command).await,
            Commands::Sweep { format } => {
                let sweeper = ExpirySweeper::new(Arc::clone(&self.manager), &self.config.sweeper)
                    .with_registry(Arc::clone(&self.registry));
                let report = sweeper.sweep_once().await?;
                Ok(format_sweep_report(&report, *format))
            }
            Commands::Config { command } => match command {
                ConfigCommands::Show { format } => format_config(&self.config, *format),
            },
        }
    }

    async fn execute_context(&self, command: &ContextCommands) -> Result<String, ApiError> {
        match command {
            ContextCommands::Get {
                id,
                payload,
                format,
            } => {
                let context = self.manager.get(id).await?;
                let bytes = if *payload {
                    Some(self.manager.fetch_payload(&context).await?)
                } else {
                    None
                };
                format_context(&context, bytes.as_deref(), *format)
            }
            ContextCommands::List {
                tenant,
                context_type,
                agent,
                limit,
                offset,
                format,
            } => {
                let filters = ContextFilters {
                    tenant_id: tenant.clone(),
                    context_type: context_type.clone(),
                    agent_id: agent.clone(),
                    limit: *limit,
                    offset: *offset,
                };
                let contexts = self.manager.list(&filters).await?;
                format_context_list(&contexts, *format)
            }
            ContextCommands::Delete { id } => {
                self.manager.delete(id).await?;
                Ok(format!("Deleted context {}", id))
            }
        }
    }

    async fn execute_agent(&self, command: &AgentCommands) -> Result<String, ApiError> {
        match command {
            AgentCommands::List {
                agent_type,
                capability,
                status,
                tenant,
                format,
            } => {
                let status = status.as_deref().map(parse_status).transpose()?;
                let filters = AgentFilters {
                    agent_type: agent_type.clone(),
                    capability: capability.clone(),
                    status,
                    tenant_id: tenant.clone(),
                    ..AgentFilters::default()
                };
                let agents = self.registry.discover(&filters).await?;
                format_agent_list(&agents, *format)
            }
        }
    }
}

fn parse_status(value: &str) -> Result<AgentStatus, ApiError> {
    match value {
        "online" => Ok(AgentStatus::Online),
        "offline" => Ok(AgentStatus::Offline),
        "unknown" => Ok(AgentStatus::Unknown),
        other => Err(ApiError::ValidationError(format!(
            "unknown agent status '{}'; expected online, offline or unknown",
            other
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::StorageError(StorageError::Serialization(e)))
}

fn expiry_text(context: &Context) -> String {
    match context.expires_at {
        Some(at) if context.is_expired() => format!("{} (expired)", at.to_rfc3339()),
        Some(at) => at.to_rfc3339(),
        None => "-".to_string(),
    }
}

fn format_context(
    context: &Context,
    payload: Option<&[u8]>,
    format: OutputFormat,
) -> Result<String, ApiError> {
    if format == OutputFormat::Json {
        let mut value = serde_json::to_value(context)
            .map_err(|e| ApiError::StorageError(StorageError::Serialization(e)))?;
        value["expired"] = json!(context.is_expired());
        if let Some(bytes) = payload {
            value["payload"] = json!(hex::encode(bytes));
        }
        return to_json(&value);
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    let allowed: Vec<&str> = context.access_control.allowed_ids.iter().map(String::as_str).collect();
    let storage = match &context.payload_ref {
        Some(r) => format!("{}:{}/{}", r.backend, r.bucket, r.key),
        None => "inline".to_string(),
    };
    let rows = vec![
        ("ID", context.id.clone()),
        ("Type", context.context_type.clone()),
        ("Agent", context.agent_id.clone()),
        ("Tenant", context.tenant_id.clone()),
        ("Scope", context.access_control.scope.to_string()),
        ("Allowed", if allowed.is_empty() { "-".to_string() } else { allowed.join(", ") }),
        ("Size", context.payload_size().to_string()),
        ("Storage", storage),
        ("Checksum", context.checksum.clone()),
        ("Version", context.version.clone()),
        ("Created", context.created_at.to_rfc3339()),
        ("Expires", expiry_text(context)),
    ];
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    let mut output = table.to_string();
    if let Some(bytes) = payload {
        output.push_str(&format!("\nPayload (hex): {}", hex::encode(bytes)));
    }
    Ok(output)
}

fn format_context_list(contexts: &[Context], format: OutputFormat) -> Result<String, ApiError> {
    if format == OutputFormat::Json {
        return to_json(&json!({ "contexts": contexts, "total": contexts.len() }));
    }
    if contexts.is_empty() {
        return Ok("No contexts found.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["ID", "Type", "Agent", "Tenant", "Scope", "Size", "Created", "Expires"]);
    for c in contexts {
        table.add_row(vec![
            c.id.clone(),
            c.context_type.clone(),
            c.agent_id.clone(),
            c.tenant_id.clone(),
            c.access_control.scope.to_string(),
            c.payload_size().to_string(),
            c.created_at.to_rfc3339(),
            expiry_text(c),
        ]);
    }
    Ok(format!("{}\n\nTotal: {} context(s)", table, contexts.len()))
}

fn format_agent_list(agents: &[Agent], format: OutputFormat) -> Result<String, ApiError> {
    if format == OutputFormat::Json {
        return to_json(&json!({ "agents": agents, "total": agents.len() }));
    }
    if agents.is_empty() {
        return Ok("No agents found.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["ID", "Type", "Status", "Tenant", "Capabilities", "Last Seen"]);
    for a in agents {
        table.add_row(vec![
            a.id.clone(),
            a.agent_type.clone(),
            a.status.as_str().to_string(),
            a.tenant_id.clone(),
            a.capabilities.join(", "),
            a.last_seen.to_rfc3339(),
        ]);
    }
    Ok(format!("{}\n\nTotal: {} agent(s)", table, agents.len()))
}

fn format_sweep_report(report: &SweepReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Text => format!(
            "Removed {} expired context(s)\nMarked {} agent(s) offline",
            report.contexts_removed, report.agents_marked_offline
        ),
    }
}

fn format_config(config: &BrokerConfig, format: OutputFormat) -> Result<String, ApiError> {
    match format {
        OutputFormat::Json => to_json(config),
        OutputFormat::Text => toml::to_string_pretty(config)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render configuration: {}", e))),
    }
}

//! Subcommand handlers.
//!
//! Each handler opens the configured store, does one thing and reports it
//! through [`Output`]. Errors bubble up as `anyhow` errors to `main`.

use super::output::Output;
use super::{Cli, Commands};
use crate::agents::{FlowContext, HierarchicalFlow, InboundMessage};
use crate::db::{ExecutionStore, HierarchyStore, TursoStore};
use crate::hierarchy::{provision_default, HierarchySpec, ObjectId, ScopeId, ToolKind};
use crate::llm::LlmCompletionService;
use crate::memory::{BoundedHistory, ConversationHistory};
use crate::tools::{
    system_tools, DatabaseToolHandler, HttpToolHandler, KindToolExecutor, SubflowHandler,
    SubflowRegistry,
};
use crate::utils::{ConfigManager, SwitchboardConfig};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Load the config file, or the defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Arc<SwitchboardConfig>> {
    if !path.exists() {
        return Ok(Arc::new(SwitchboardConfig::default()));
    }
    let config = SwitchboardConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok(Arc::new(config))
}

/// A watching manager for the config file, or `None` when running on defaults.
fn watch_config(path: &Path) -> Result<Option<ConfigManager>> {
    if !path.exists() {
        return Ok(None);
    }
    let manager = ConfigManager::new(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    manager
        .watch()
        .with_context(|| format!("failed to watch {}", path.display()))?;
    Ok(Some(manager))
}

pub async fn run(cli: Cli, config: Arc<SwitchboardConfig>, output: &Output) -> Result<()> {
    if let Commands::Config { validate } = &cli.command {
        return show_config(&cli.config, &config, *validate, output);
    }

    let provider = match &cli.database {
        Some(url) => config.database_provider_for(url),
        None => config.database_provider(),
    };
    let store = Arc::new(
        provider
            .create_store()
            .await
            .context("failed to open the database")?,
    );

    match cli.command {
        Commands::Ask {
            scope,
            message,
            conversation,
        } => ask(&config, store, &scope, &message, conversation, output).await,
        Commands::Chat {
            scope,
            conversation,
        } => {
            let manager = watch_config(&cli.config)?;
            let mut session = ChatSession::new(config, manager, store)?;
            chat(&mut session, &scope, conversation, output).await
        }
        Commands::Seed { file } => seed(store.as_ref(), &file, output).await,
        Commands::Provision { scope, instance } => {
            provision(store.as_ref(), &scope, &instance, output).await
        }
        Commands::Agents { scope } => agents(store.as_ref(), &scope, output).await,
        Commands::Deactivate { id } => deactivate(store.as_ref(), &id, output).await,
        Commands::Executions { scope, limit } => executions(store.as_ref(), &scope, limit, output).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Conversation history per `[history]`, or `None` when disabled.
pub fn new_history(config: &SwitchboardConfig) -> Result<Option<Arc<dyn ConversationHistory>>> {
    if !config.history.enabled {
        return Ok(None);
    }
    let history: Arc<dyn ConversationHistory> = Arc::new(BoundedHistory::new(config.history_limits())?);
    Ok(Some(history))
}

/// Wire the flow's collaborators from config and an open store.
pub fn build_flow(
    config: &SwitchboardConfig,
    store: Arc<TursoStore>,
    history: Option<Arc<dyn ConversationHistory>>,
) -> Result<HierarchicalFlow> {
    let client = config
        .provider()?
        .create_client(config.llm_timeout())
        .context("failed to create the LLM client")?;
    let completion = Arc::new(LlmCompletionService::new(client, config.tool_calling()));

    let http_timeout = config.http_tool_timeout();
    let tools = KindToolExecutor::new()
        .with_handler(
            ToolKind::Database,
            Arc::new(DatabaseToolHandler::new(store.connection())),
        )
        .with_handler(ToolKind::Api, Arc::new(HttpToolHandler::api(http_timeout)?))
        .with_handler(ToolKind::Webhook, Arc::new(HttpToolHandler::webhook(http_timeout)?))
        .with_handler(
            ToolKind::Subflow,
            Arc::new(SubflowHandler::new(Arc::new(SubflowRegistry::new()))),
        );

    let mut builder = FlowContext::builder()
        .repository(store.clone())
        .executions(store)
        .completion(completion)
        .tools(Arc::new(tools))
        .settings(config.flow_settings());
    if let Some(history) = history {
        builder = builder.history(history);
    }

    Ok(HierarchicalFlow::new(builder.build()?))
}

async fn ask(
    config: &SwitchboardConfig,
    store: Arc<TursoStore>,
    scope: &str,
    message: &str,
    conversation: Option<String>,
    output: &Output,
) -> Result<()> {
    let flow = build_flow(config, store, new_history(config)?)?;
    let mut inbound = InboundMessage::new(ScopeId::new(scope)?, message);
    if let Some(conversation) = conversation {
        inbound = inbound.with_conversation(conversation);
    }

    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    match flow.handle_with_cancel(inbound, cancel).await {
        Ok(outcome) => {
            output.reply(&outcome.reply);
            output.chain(&outcome.chain);
            match &outcome.execution_id {
                Some(id) => output.kv("execution", id.as_str()),
                None => output.warning("execution record was not written"),
            }
            Ok(())
        }
        Err(e) => {
            if let Some(id) = &e.execution_id {
                output.kv("execution", id.as_str());
            }
            if e.is_not_found() {
                output.hint(&format!(
                    "Run `switchboard provision {}` or `switchboard seed <file>` first.",
                    scope
                ));
            }
            Err(e.into())
        }
    }
}

/// An interactive session over one store.
///
/// The flow is rebuilt when the watched config changes. The conversation
/// history is created once and carried across rebuilds, so its limits are
/// the ones in force when the session started.
pub struct ChatSession {
    manager: Option<ConfigManager>,
    config: Arc<SwitchboardConfig>,
    store: Arc<TursoStore>,
    history: Option<Arc<dyn ConversationHistory>>,
    flow: HierarchicalFlow,
}

impl ChatSession {
    pub fn new(
        config: Arc<SwitchboardConfig>,
        manager: Option<ConfigManager>,
        store: Arc<TursoStore>,
    ) -> Result<Self> {
        let config = manager.as_ref().map(|m| m.config()).unwrap_or(config);
        let history = new_history(&config)?;
        let flow = build_flow(&config, store.clone(), history.clone())?;
        Ok(Self {
            manager,
            config,
            store,
            history,
            flow,
        })
    }

    pub fn flow(&self) -> &HierarchicalFlow {
        &self.flow
    }

    /// Rebuild the flow if the configuration changed since the last call.
    ///
    /// A configuration the flow cannot be built from is reported once and the
    /// previous flow stays in use.
    pub fn refresh(&mut self) -> Result<bool> {
        let latest = match &self.manager {
            Some(manager) => manager.config(),
            None => return Ok(false),
        };
        if Arc::ptr_eq(&latest, &self.config) {
            return Ok(false);
        }
        self.config = latest;
        self.flow = build_flow(&self.config, self.store.clone(), self.history.clone())?;
        Ok(true)
    }
}

async fn chat(
    session: &mut ChatSession,
    scope: &str,
    conversation: Option<String>,
    output: &Output,
) -> Result<()> {
    let scope = ScopeId::new(scope)?;
    output.info(&format!("Talking to {} (empty line or Ctrl-D ends the session)", scope));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            break;
        }
        match session.refresh() {
            Ok(true) => output.info("Configuration changed, flow rebuilt"),
            Ok(false) => {}
            Err(e) => output.warning(&format!("Keeping the previous configuration: {:#}", e)),
        }

        let mut inbound = InboundMessage::new(scope.clone(), text);
        if let Some(conversation) = &conversation {
            inbound = inbound.with_conversation(conversation.clone());
        }
        let cancel = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        match session.flow().handle_with_cancel(inbound, cancel).await {
            Ok(outcome) => {
                output.reply(&outcome.reply);
                output.chain(&outcome.chain);
            }
            Err(e) if e.is_not_found() => {
                output.hint(&format!(
                    "Run `switchboard provision {}` or `switchboard seed <file>` first.",
                    scope
                ));
                return Err(e.into());
            }
            Err(e) => output.error(&e.to_string()),
        }
    }
    Ok(())
}

async fn seed(store: &dyn HierarchyStore, file: &Path, output: &Output) -> Result<()> {
    let spec = HierarchySpec::from_file(file)?;
    let report = spec.apply(store).await?;

    output.success(&format!("Seeded {}", file.display()));
    output.kv("tools", &report.tools.to_string());
    output.kv("agents", &report.agents.to_string());
    output.kv("bindings", &report.bindings.to_string());
    if report.reused_routers > 0 {
        output.kv("existing routers kept", &report.reused_routers.to_string());
    }
    Ok(())
}

async fn provision(
    store: &dyn HierarchyStore,
    scope: &str,
    instance: &str,
    output: &Output,
) -> Result<()> {
    for tool in system_tools() {
        if store.find_tool(&tool.name).await?.is_none() {
            let name = tool.name.clone();
            store.upsert_tool(tool).await?;
            output.info(&format!("Registered tool {}", name));
        }
    }

    let structure = provision_default(store, &ScopeId::new(scope)?, instance).await?;
    output.success(&format!("Provisioned scope {}", scope));
    output.kv(
        "router",
        &format!(
            "{}{}",
            structure.router,
            if structure.reused_router { " (existing)" } else { "" }
        ),
    );
    output.kv("department", structure.department.as_str());
    output.kv("specialist", structure.specialist.as_str());
    Ok(())
}

async fn agents(store: &dyn HierarchyStore, scope: &str, output: &Output) -> Result<()> {
    let scope = ScopeId::new(scope)?;
    let mut agents = store.list_agents(&scope).await?;
    if agents.is_empty() {
        output.warning(&format!("No agents in scope {}", scope));
        return Ok(());
    }

    // Print as a tree: each agent followed by its children.
    agents.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
    output.header(&format!("Agents in {}", scope));
    let mut stack: Vec<Option<ObjectId>> = vec![None];
    let mut printed = 0;
    while let Some(parent) = stack.pop() {
        let children: Vec<_> = agents
            .iter()
            .filter(|a| a.parent_id == parent)
            .collect();
        for child in children.iter().rev() {
            stack.push(Some(child.id.clone()));
        }
        if let Some(parent) = parent {
            if let Some(agent) = agents.iter().find(|a| a.id == parent) {
                output.agent(agent);
                printed += 1;
            }
        }
    }
    if printed < agents.len() {
        output.warning(&format!("{} agents are detached from the tree", agents.len() - printed));
    }
    Ok(())
}

async fn deactivate(store: &dyn HierarchyStore, id: &str, output: &Output) -> Result<()> {
    let id = ObjectId::parse(id)?;
    let changed = store.deactivate_agent(&id).await?;
    if changed.is_empty() {
        output.info(&format!("Agent {} was already inactive", id));
    } else {
        output.success(&format!("Deactivated {} agent(s)", changed.len()));
        for id in &changed {
            output.kv("id", id.as_str());
        }
    }
    Ok(())
}

async fn executions(
    store: &dyn ExecutionStore,
    scope: &str,
    limit: usize,
    output: &Output,
) -> Result<()> {
    let scope = ScopeId::new(scope)?;
    let records = store.recent(&scope, limit).await?;
    if records.is_empty() {
        output.info(&format!("No executions recorded for {}", scope));
        return Ok(());
    }
    output.header(&format!("Last {} executions in {}", records.len(), scope));
    for record in &records {
        output.execution(record);
    }
    Ok(())
}

fn show_config(path: &Path, config: &SwitchboardConfig, validate: bool, output: &Output) -> Result<()> {
    if validate {
        if !path.exists() {
            anyhow::bail!("configuration file {} does not exist", path.display());
        }
        SwitchboardConfig::load(path)?;
        output.success(&format!("{} is valid", path.display()));
        return Ok(());
    }

    output.header("Configuration");
    output.kv(
        "file",
        &if path.exists() {
            path.display().to_string()
        } else {
            format!("{} (not found, using defaults)", path.display())
        },
    );
    output.kv("log level", &config.logging.level);
    output.kv("database", &config.database.url);
    output.kv("llm", &format!("{} / {}", config.llm.provider, config.llm.model));
    output.kv("llm base url", &config.llm.base_url);
    output.kv("request timeout", &format!("{}s", config.flow.request_timeout_secs));
    output.kv("refinement", &format!("{:?}", config.flow.refinement));
    output.kv(
        "history",
        &if config.history.enabled {
            format!(
                "{} messages, {} conversations, {}s ttl",
                config.history.max_messages, config.history.max_conversations, config.history.ttl_secs
            )
        } else {
            "disabled".to_string()
        },
    );
    Ok(())
}

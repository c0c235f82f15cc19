//! Project Tree MCP Server
//!
//! Serves the project task tree engine as MCP tools over stdio.

use anyhow::Result;
use clap::Parser;
use project_tree_mcp::cli::{AuditArgs, Cli, Command};
use project_tree_mcp::config::{Config, ConfigLoader};
use project_tree_mcp::db::Database;
use project_tree_mcp::error::ToolError;
use project_tree_mcp::logging;
use project_tree_mcp::tools::ToolHandler;
use rmcp::{
    ErrorData, RoleServer, ServerHandler, ServiceExt,
    model::{
        CallToolRequestParams, CallToolResult, Content, InitializeResult, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities,
    },
    service::RequestContext,
    transport::io::stdio,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const INSTRUCTIONS: &str = "\
Project task trees. Start: create_project() \u{2192} get_root_task() \u{2192} assign_self() \u{2192} create_subtask(). \
Leaves finish into their parent's progress; a parent finishes once progress equals children_weight.";

/// MCP server handler.
#[derive(Clone)]
struct ProjectTreeServer {
    tool_handler: Arc<ToolHandler>,
}

impl ProjectTreeServer {
    fn new(tool_handler: ToolHandler) -> Self {
        Self {
            tool_handler: Arc::new(tool_handler),
        }
    }
}

impl ServerHandler for ProjectTreeServer {
    fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: Default::default(),
            server_info: rmcp::model::Implementation {
                name: "project-tree-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            capabilities: ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.tool_handler.get_tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let tool_name = request.name.to_string();
        let start = std::time::Instant::now();

        let handler = Arc::clone(&self.tool_handler);
        let args = Value::Object(request.arguments.unwrap_or_default());
        let name = tool_name.clone();
        // Database work blocks for up to the lock timeout.
        let outcome = tokio::task::spawn_blocking(move || handler.call_tool(&name, args))
            .await
            .map_err(|e| anyhow::anyhow!("tool task failed: {}", e))
            .and_then(|r| r);

        let elapsed = start.elapsed();
        match outcome {
            Ok(result) => {
                debug!(tool = %tool_name, duration_ms = elapsed.as_millis() as u64, "Tool call succeeded");
                Ok(CallToolResult {
                    content: vec![Content::text(result.to_string())],
                    is_error: None,
                    meta: None,
                    structured_content: None,
                })
            }
            Err(e) => {
                // Try to downcast to ToolError for structured response
                let error_json = match e.downcast::<ToolError>() {
                    Ok(tool_err) => {
                        warn!(
                            tool = %tool_name,
                            error_code = ?tool_err.code,
                            retryable = tool_err.code.is_retryable(),
                            error_message = %tool_err.message,
                            duration_ms = elapsed.as_millis() as u64,
                            "Tool call failed"
                        );
                        serde_json::to_string(&tool_err).unwrap_or_else(|_| {
                            json!({ "error": tool_err.to_string() }).to_string()
                        })
                    }
                    Err(e) => {
                        warn!(
                            tool = %tool_name,
                            error = %e,
                            duration_ms = elapsed.as_millis() as u64,
                            "Tool call failed with internal error"
                        );
                        json!({
                            "code": "INTERNAL_ERROR",
                            "message": e.to_string()
                        })
                        .to_string()
                    }
                };
                Ok(CallToolResult {
                    content: vec![Content::text(error_json)],
                    is_error: Some(true),
                    meta: None,
                    structured_content: None,
                })
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log, cli.verbose)?;

    let mut loader = match &cli.config {
        Some(path) => ConfigLoader::load_file(Path::new(path))?,
        None => ConfigLoader::load()?,
    };
    for source in loader.sources() {
        debug!(path = %source.display(), "Config source");
    }
    debug!(engine = ?loader.config().engine, "Engine config");

    // CLI flags override every config tier
    if let Some(db_path) = &cli.database {
        loader.config_mut().server.db_path = db_path.into();
    }
    let config = loader.into_config();

    match cli.command {
        Some(Command::Audit(args)) => run_audit(&config, args),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn open_database(config: &Config) -> Result<Database> {
    Database::open_with_timeout(&config.server.db_path, config.engine.lock_timeout())
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        "Starting Project Tree MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Database: {:?}", config.server.db_path);

    let db = Arc::new(open_database(&config)?);
    info!(
        lock_timeout_ms = db.lock_timeout().as_millis() as u64,
        "Database initialized successfully"
    );

    let server = ProjectTreeServer::new(ToolHandler::new(
        db,
        config.engine.clone(),
        config.server.default_format,
    ));

    // Run the stdio server
    info!("Server ready, listening on stdio");
    let transport = stdio();
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}

/// Print aggregate mismatches as JSON; exit non-zero when there are any.
fn run_audit(config: &Config, args: AuditArgs) -> Result<()> {
    let db = open_database(config)?;
    let tasks = db.count_tasks(args.project_id)?;
    let mismatches = db.audit_aggregates(args.project_id)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "tasks_checked": tasks,
            "mismatches": mismatches,
        }))?
    );

    if mismatches.is_empty() {
        info!(tasks, "Aggregates consistent");
        Ok(())
    } else {
        warn!(tasks, mismatches = mismatches.len(), "Aggregate mismatches found");
        std::process::exit(1);
    }
}

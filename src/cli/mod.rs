//! CLI command definitions for project-tree-mcp
//!
//! The main entry point is the `Cli` struct; with no subcommand the MCP
//! server runs on stdio.

use clap::{Args, Parser, Subcommand};

/// Project Tree MCP Server and maintenance tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server (default if no subcommand given)
    Serve,

    /// Recount subtask aggregates and report rows that disagree
    Audit(AuditArgs),
}

#[derive(Args, Debug, Default)]
pub struct AuditArgs {
    /// Only audit tasks of this project
    #[arg(short, long)]
    pub project_id: Option<i64>,
}

//! Project Tree MCP Server Library
//!
//! Projects own a tree of weighted tasks. Finished subtasks roll their weight
//! up into the parent's progress, and every mutation is a guarded conditional
//! update inside one SQLite transaction.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod logging;
pub mod roles;
pub mod tools;
pub mod types;
pub mod validation;

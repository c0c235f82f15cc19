//! MCP tool implementations.

pub mod projects;
pub mod tasks;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::ToolError;
use crate::format::OutputFormat;
use crate::roles::{MemberTable, ProjectRoles};
use crate::types::{Metadata, PageRequest};
use crate::validation::page_request;
use anyhow::Result;
use chrono::DateTime;
use rmcp::model::Tool;
use serde_json::Value;
use std::sync::Arc;

/// Tool handler that processes MCP tool calls.
#[derive(Clone)]
pub struct ToolHandler {
    pub db: Arc<Database>,
    pub engine: EngineConfig,
    pub default_format: OutputFormat,
    pub roles: Arc<dyn ProjectRoles>,
}

impl ToolHandler {
    pub fn new(db: Arc<Database>, engine: EngineConfig, default_format: OutputFormat) -> Self {
        Self {
            db,
            engine,
            default_format,
            roles: Arc::new(MemberTable),
        }
    }

    /// Replace the membership collaborator.
    pub fn with_roles(mut self, roles: Arc<dyn ProjectRoles>) -> Self {
        self.roles = roles;
        self
    }

    /// Get all available tools.
    pub fn get_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();

        // Task tools
        tools.extend(tasks::get_tools());

        // Project tools
        tools.extend(projects::get_tools());

        tools
    }

    /// Call a tool by name. Blocks on the database; run it off the async
    /// executor.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        match name {
            // Task reads
            "get_root_task" => tasks::get_root_task(self, arguments),
            "get_task" => tasks::get_task(self, arguments),
            "list_tasks" => tasks::list_tasks(self, arguments),
            "list_subtasks" => tasks::list_subtasks(self, arguments),

            // Task writes
            "create_subtask" => tasks::create_subtask(&self.db, arguments),
            "update_task" => tasks::update_task(&self.db, arguments),
            "delete_task" => tasks::delete_task(&self.db, arguments),

            // Assignment
            "assign_task" => tasks::assign_task(&self.db, self.roles.as_ref(), arguments),
            "assign_self" => tasks::assign_self(&self.db, self.roles.as_ref(), arguments),

            // Lifecycle
            "start_task" => tasks::start_task(&self.db, arguments),
            "finish_task" => tasks::finish_task(&self.db, arguments),
            "reject_task" => tasks::reject_task(&self.db, arguments),
            "cancel_task" => tasks::cancel_task(&self.db, arguments),

            // Projects
            "create_project" => projects::create_project(&self.db, self.roles.as_ref(), arguments),
            "get_project" => projects::get_project(self, arguments),
            "list_projects" => projects::list_projects(self, arguments),
            "list_joined_projects" => projects::list_joined_projects(self, arguments),
            "update_project" => projects::update_project(&self.db, arguments),
            "delete_project" => projects::delete_project(&self.db, arguments),
            "add_project_member" => projects::add_project_member(&self.db, arguments),

            _ => Err(ToolError::unknown_tool(name).into()),
        }
    }

    /// Output format requested by `args`, or the configured default.
    pub fn format(&self, args: &Value) -> Result<OutputFormat, ToolError> {
        match get_string(args, "format") {
            None => Ok(self.default_format),
            Some(s) => OutputFormat::from_str(&s)
                .ok_or_else(|| ToolError::invalid_value("format", "format must be json or markdown")),
        }
    }

    /// `page` / `page_size` arguments resolved against the engine limits.
    pub fn page(&self, args: &Value) -> Result<PageRequest, ToolError> {
        page_request(
            optional_i64(args, "page")?,
            optional_i64(args, "page_size")?,
            &self.engine,
        )
    }
}

/// Helper to create a tool definition.
pub fn make_tool(name: &str, description: &str, properties: Value, required: Vec<&str>) -> Tool {
    let input_schema = rmcp::model::JsonObject::from_iter([
        ("type".to_string(), serde_json::json!("object")),
        ("properties".to_string(), properties),
        ("required".to_string(), serde_json::json!(required)),
    ]);

    Tool::new(name.to_string(), description.to_string(), input_schema)
}

/// Helper to get a string from arguments.
pub fn get_string(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str().map(String::from))
}

/// The argument, treating an explicit `null` as absent.
fn present<'a>(args: &'a Value, key: &str) -> Option<&'a Value> {
    args.get(key).filter(|v| !v.is_null())
}

pub fn require_string(args: &Value, key: &str) -> Result<String, ToolError> {
    match present(args, key) {
        None => Err(ToolError::missing_field(key)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ToolError::missing_field(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ToolError::invalid_value(key, &format!("{} must be a string", key))),
    }
}

pub fn require_i64(args: &Value, key: &str) -> Result<i64, ToolError> {
    optional_i64(args, key)?.ok_or_else(|| ToolError::missing_field(key))
}

pub fn require_bool(args: &Value, key: &str) -> Result<bool, ToolError> {
    optional_bool(args, key)?.ok_or_else(|| ToolError::missing_field(key))
}

/// A value of the wrong type is an error, not ignored.
pub fn optional_i64(args: &Value, key: &str) -> Result<Option<i64>, ToolError> {
    present(args, key)
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| ToolError::invalid_value(key, &format!("{} must be an integer", key)))
        })
        .transpose()
}

pub fn optional_bool(args: &Value, key: &str) -> Result<Option<bool>, ToolError> {
    present(args, key)
        .map(|v| {
            v.as_bool()
                .ok_or_else(|| ToolError::invalid_value(key, &format!("{} must be a boolean", key)))
        })
        .transpose()
}

pub fn optional_string(args: &Value, key: &str) -> Result<Option<String>, ToolError> {
    present(args, key)
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| ToolError::invalid_value(key, &format!("{} must be a string", key)))
        })
        .transpose()
}

pub fn optional_metadata(args: &Value, key: &str) -> Result<Option<Metadata>, ToolError> {
    present(args, key)
        .map(|v| {
            v.as_object()
                .cloned()
                .ok_or_else(|| ToolError::invalid_value(key, &format!("{} must be an object", key)))
        })
        .transpose()
}

/// A timestamp given as epoch milliseconds or an RFC 3339 string.
pub fn optional_timestamp(args: &Value, key: &str) -> Result<Option<i64>, ToolError> {
    let Some(value) = present(args, key) else {
        return Ok(None);
    };
    if let Some(ms) = value.as_i64() {
        return Ok(Some(ms));
    }
    let invalid = || {
        ToolError::invalid_value(
            key,
            &format!("{} must be epoch milliseconds or an RFC 3339 timestamp", key),
        )
    };
    let text = value.as_str().ok_or_else(invalid)?;
    DateTime::parse_from_rfc3339(text.trim())
        .map(|d| Some(d.timestamp_millis()))
        .map_err(|_| invalid())
}

pub fn require_timestamp(args: &Value, key: &str) -> Result<i64, ToolError> {
    optional_timestamp(args, key)?.ok_or_else(|| ToolError::missing_field(key))
}

/// `{}` result for mutations that return nothing.
pub fn empty() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn require_string_rejects_blank_and_wrong_type() {
        let args = json!({"a": "x", "b": "  ", "c": 3, "d": null});
        assert_eq!(require_string(&args, "a").unwrap(), "x");
        assert_eq!(
            require_string(&args, "b").unwrap_err().code,
            ErrorCode::MissingRequiredField
        );
        assert_eq!(
            require_string(&args, "c").unwrap_err().code,
            ErrorCode::InvalidFieldValue
        );
        assert_eq!(
            require_string(&args, "d").unwrap_err().code,
            ErrorCode::MissingRequiredField
        );
    }

    #[test]
    fn integers_are_strict() {
        let args = json!({"id": 4, "bad": "4", "float": 1.5});
        assert_eq!(require_i64(&args, "id").unwrap(), 4);
        assert_eq!(optional_i64(&args, "missing").unwrap(), None);
        assert_eq!(
            optional_i64(&args, "bad").unwrap_err().code,
            ErrorCode::InvalidFieldValue
        );
        assert!(optional_i64(&args, "float").is_err());
    }

    #[test]
    fn timestamps_accept_millis_and_rfc3339() {
        let args = json!({
            "ms": 86_400_000,
            "text": "1970-01-02T00:00:00Z",
            "offset": "1970-01-02T01:00:00+01:00",
            "junk": "tomorrow"
        });
        assert_eq!(require_timestamp(&args, "ms").unwrap(), 86_400_000);
        assert_eq!(require_timestamp(&args, "text").unwrap(), 86_400_000);
        assert_eq!(require_timestamp(&args, "offset").unwrap(), 86_400_000);
        assert_eq!(
            require_timestamp(&args, "junk").unwrap_err().field.as_deref(),
            Some("junk")
        );
        assert_eq!(
            require_timestamp(&args, "none").unwrap_err().code,
            ErrorCode::MissingRequiredField
        );
    }

    #[test]
    fn metadata_must_be_an_object() {
        let args = json!({"m": {"k": 1}, "bad": [1]});
        assert_eq!(optional_metadata(&args, "m").unwrap().unwrap()["k"], 1);
        assert!(optional_metadata(&args, "bad").is_err());
    }

    #[test]
    fn bools_are_strict() {
        let args = json!({"yes": true, "text": "true"});
        assert_eq!(require_bool(&args, "yes").unwrap(), true);
        assert!(optional_bool(&args, "text").is_err());
        assert_eq!(get_string(&args, "text").as_deref(), Some("true"));
    }
}

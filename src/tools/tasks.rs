//! Task tools: reads, subtask edits, assignment and lifecycle transitions.

use super::{
    ToolHandler, empty, make_tool, optional_i64, optional_metadata, optional_string,
    optional_timestamp, require_i64, require_string, require_timestamp,
};
use crate::db::Database;
use crate::error::ToolError;
use crate::format::{OutputFormat, format_task_markdown, format_tasks_markdown, markdown_to_json};
use crate::roles::ProjectRoles;
use crate::types::{
    MetadataFilter, NewSubtask, OrderBy, Page, SortDirection, SubtaskQuery, Task, TaskColumn,
    TaskListQuery, TaskStatus, TaskUpdate,
};
use crate::validation::MAX_WEIGHT;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{Value, json};

fn task_id_property() -> Value {
    json!({
        "type": "integer",
        "description": "Task ID"
    })
}

fn format_property() -> Value {
    json!({
        "type": "string",
        "enum": ["json", "markdown"],
        "description": "Output format (default from server config)"
    })
}

fn paging_properties(properties: &mut Value) {
    if let Some(obj) = properties.as_object_mut() {
        obj.insert(
            "page".to_string(),
            json!({ "type": "integer", "minimum": 1, "description": "1-indexed page (default 1)" }),
        );
        obj.insert(
            "page_size".to_string(),
            json!({ "type": "integer", "minimum": 1, "description": "Items per page (capped by server config)" }),
        );
    }
}

pub fn get_tools() -> Vec<Tool> {
    let mut list_tasks_props = json!({
        "project_id": { "type": "integer", "description": "Project ID" },
        "user_id": { "type": "string", "description": "Only tasks created by this user" },
        "ids": {
            "type": "array",
            "items": { "type": "integer" },
            "maxItems": 20,
            "description": "Only these task IDs"
        },
        "format": format_property()
    });
    paging_properties(&mut list_tasks_props);

    let mut list_subtasks_props = json!({
        "task_id": task_id_property(),
        "user_id": { "type": "string", "description": "Only subtasks created by this user" },
        "assignee": { "type": "string", "description": "Only subtasks assigned to this user" },
        "statuses": {
            "type": "array",
            "items": { "type": "string", "enum": ["pending", "inprogress", "finished", "rejected", "canceled"] },
            "maxItems": 10,
            "description": "Only subtasks in one of these statuses"
        },
        "metadata_filters": {
            "type": "array",
            "maxItems": 10,
            "items": {
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "op": { "type": "string", "enum": ["eq", "ne", "gt", "gte", "lt", "lte"] },
                    "value": {}
                },
                "required": ["key", "value"]
            },
            "description": "Predicates on metadata attributes, ANDed together"
        },
        "order_by": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "column": { "type": "string" },
                    "direction": { "type": "string", "enum": ["asc", "desc"] }
                },
                "required": ["column"]
            },
            "description": "Sort keys; ties fall back to id ascending"
        },
        "format": format_property()
    });
    paging_properties(&mut list_subtasks_props);

    let transition = |name: &str, description: &str| {
        make_tool(
            name,
            description,
            json!({ "task_id": task_id_property() }),
            vec!["task_id"],
        )
    };

    vec![
        make_tool(
            "get_root_task",
            "Get the root task of a project.",
            json!({
                "project_id": { "type": "integer", "description": "Project ID" },
                "format": format_property()
            }),
            vec!["project_id"],
        ),
        make_tool(
            "get_task",
            "Get a task by ID, including its subtask aggregates (children_count, children_weight, progress).",
            json!({
                "task_id": task_id_property(),
                "format": format_property()
            }),
            vec!["task_id"],
        ),
        make_tool(
            "list_tasks",
            "List all tasks of a project, paginated.",
            list_tasks_props,
            vec!["project_id"],
        ),
        make_tool(
            "list_subtasks",
            "List the direct subtasks of a task with optional filters and ordering, paginated.",
            list_subtasks_props,
            vec!["task_id"],
        ),
        make_tool(
            "create_subtask",
            "Create a subtask. The parent must be assigned and pending or inprogress, and the subtask's expiry_date must not be later than the parent's.",
            json!({
                "task_id": { "type": "integer", "description": "Parent task ID" },
                "caller_id": { "type": "string", "description": "Creating user" },
                "title": { "type": "string", "minLength": 1, "maxLength": 2048 },
                "expiry_date": {
                    "type": ["string", "integer"],
                    "description": "Deadline as RFC 3339 or epoch milliseconds"
                },
                "weight": { "type": "integer", "minimum": 1, "maximum": MAX_WEIGHT, "description": "Share of the parent's progress (default 1)" },
                "metadata": { "type": "object", "description": "Free-form attributes" }
            }),
            vec!["task_id", "caller_id", "title", "expiry_date"],
        ),
        make_tool(
            "update_task",
            "Edit title, expiry_date, weight or metadata of a pending or inprogress task. A weight change moves the parent's children_weight by the difference.",
            json!({
                "task_id": task_id_property(),
                "title": { "type": "string", "minLength": 1, "maxLength": 2048 },
                "expiry_date": {
                    "type": ["string", "integer"],
                    "description": "Deadline as RFC 3339 or epoch milliseconds"
                },
                "weight": { "type": "integer", "minimum": 1, "maximum": MAX_WEIGHT },
                "metadata": { "type": "object", "description": "Replaces the task's metadata" }
            }),
            vec!["task_id"],
        ),
        make_tool(
            "delete_task",
            "Delete a pending, childless subtask. Root tasks cannot be deleted.",
            json!({ "task_id": task_id_property() }),
            vec!["task_id"],
        ),
        make_tool(
            "assign_task",
            "Assign an unassigned task to a project member. Fails with ALREADY_ASSIGNED if someone holds it.",
            json!({
                "task_id": task_id_property(),
                "user_id": { "type": "string", "description": "User to assign" }
            }),
            vec!["task_id", "user_id"],
        ),
        make_tool(
            "assign_self",
            "Assign an unassigned task to the caller.",
            json!({
                "task_id": task_id_property(),
                "caller_id": { "type": "string", "description": "Calling user" }
            }),
            vec!["task_id", "caller_id"],
        ),
        transition("start_task", "Move a pending task to inprogress."),
        transition(
            "finish_task",
            "Finish a pending or inprogress task. A leaf adds its weight to the parent's progress; a parent can only finish once progress equals children_weight.",
        ),
        transition(
            "reject_task",
            "Reject a pending or inprogress task that has no subtasks. Its weight drops to 0 and leaves the parent's children_weight.",
        ),
        transition(
            "cancel_task",
            "Cancel a pending task that has no subtasks. Its weight drops to 0 and leaves the parent's children_weight.",
        ),
    ]
}

fn render_task(task: Task, format: OutputFormat) -> Result<Value> {
    match format {
        OutputFormat::Markdown => Ok(markdown_to_json(format_task_markdown(&task))),
        OutputFormat::Json => Ok(serde_json::to_value(task)?),
    }
}

fn render_tasks(page: Page<Task>, format: OutputFormat) -> Result<Value> {
    match format {
        OutputFormat::Markdown => Ok(markdown_to_json(format_tasks_markdown(&page))),
        OutputFormat::Json => Ok(serde_json::to_value(page)?),
    }
}

pub fn get_root_task(handler: &ToolHandler, args: Value) -> Result<Value> {
    let project_id = require_i64(&args, "project_id")?;
    let format = handler.format(&args)?;
    render_task(handler.db.get_root_task(project_id)?, format)
}

pub fn get_task(handler: &ToolHandler, args: Value) -> Result<Value> {
    let task_id = require_i64(&args, "task_id")?;
    let format = handler.format(&args)?;
    render_task(handler.db.get_task(task_id)?, format)
}

pub fn list_tasks(handler: &ToolHandler, args: Value) -> Result<Value> {
    let project_id = require_i64(&args, "project_id")?;
    let format = handler.format(&args)?;
    let query = TaskListQuery {
        user_id: optional_string(&args, "user_id")?,
        ids: parse_ids(&args)?,
        page: handler.page(&args)?,
    };
    render_tasks(handler.db.list_tasks(project_id, &query)?, format)
}

pub fn list_subtasks(handler: &ToolHandler, args: Value) -> Result<Value> {
    let task_id = require_i64(&args, "task_id")?;
    let format = handler.format(&args)?;
    let mut query = SubtaskQuery::new(handler.page(&args)?);
    query.user_id = optional_string(&args, "user_id")?;
    query.assignee = optional_string(&args, "assignee")?;
    query.statuses = parse_statuses(&args)?;
    query.metadata_filters = parse_metadata_filters(&args)?;
    query.order_by = parse_order_by(&args)?;
    render_tasks(handler.db.list_subtasks(task_id, &query)?, format)
}

pub fn create_subtask(db: &Database, args: Value) -> Result<Value> {
    let input = NewSubtask {
        parent_id: require_i64(&args, "task_id")?,
        user_id: require_string(&args, "caller_id")?,
        title: require_string(&args, "title")?,
        expiry_date: require_timestamp(&args, "expiry_date")?,
        weight: optional_i64(&args, "weight")?.unwrap_or(1),
        metadata: optional_metadata(&args, "metadata")?,
    };
    let id = db.create_subtask(input)?;
    Ok(json!({ "id": id }))
}

pub fn update_task(db: &Database, args: Value) -> Result<Value> {
    let task_id = require_i64(&args, "task_id")?;
    let update = TaskUpdate {
        title: optional_string(&args, "title")?,
        expiry_date: optional_timestamp(&args, "expiry_date")?,
        weight: optional_i64(&args, "weight")?,
        metadata: optional_metadata(&args, "metadata")?,
    };
    if update.is_empty() {
        return Err(ToolError::invalid_value(
            "task_id",
            "nothing to update: pass title, expiry_date, weight or metadata",
        )
        .into());
    }
    db.update_task(task_id, update)?;
    Ok(empty())
}

pub fn delete_task(db: &Database, args: Value) -> Result<Value> {
    db.delete_task(require_i64(&args, "task_id")?)?;
    Ok(empty())
}

pub fn assign_task(db: &Database, roles: &dyn ProjectRoles, args: Value) -> Result<Value> {
    let task_id = require_i64(&args, "task_id")?;
    let user_id = require_string(&args, "user_id")?;
    db.assign_with_roles(task_id, &user_id, roles)?;
    Ok(empty())
}

pub fn assign_self(db: &Database, roles: &dyn ProjectRoles, args: Value) -> Result<Value> {
    let task_id = require_i64(&args, "task_id")?;
    let caller_id = require_string(&args, "caller_id")?;
    db.assign_with_roles(task_id, &caller_id, roles)?;
    Ok(empty())
}

pub fn start_task(db: &Database, args: Value) -> Result<Value> {
    db.start_task(require_i64(&args, "task_id")?)?;
    Ok(empty())
}

pub fn finish_task(db: &Database, args: Value) -> Result<Value> {
    db.finish_task(require_i64(&args, "task_id")?)?;
    Ok(empty())
}

pub fn reject_task(db: &Database, args: Value) -> Result<Value> {
    db.reject_task(require_i64(&args, "task_id")?)?;
    Ok(empty())
}

pub fn cancel_task(db: &Database, args: Value) -> Result<Value> {
    db.cancel_task(require_i64(&args, "task_id")?)?;
    Ok(empty())
}

fn array_arg<'a>(args: &'a Value, key: &str) -> Result<&'a [Value], ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(ToolError::invalid_value(key, &format!("{} must be an array", key))),
    }
}

fn parse_ids(args: &Value) -> Result<Vec<i64>, ToolError> {
    array_arg(args, "ids")?
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| ToolError::invalid_value("ids", "ids must be integers"))
        })
        .collect()
}

fn parse_statuses(args: &Value) -> Result<Vec<TaskStatus>, ToolError> {
    array_arg(args, "statuses")?
        .iter()
        .map(|v| {
            let s = v
                .as_str()
                .ok_or_else(|| ToolError::invalid_value("statuses", "statuses must be strings"))?;
            s.parse::<TaskStatus>()
                .map_err(|e| ToolError::invalid_value("statuses", &e))
        })
        .collect()
}

fn parse_metadata_filters(args: &Value) -> Result<Vec<MetadataFilter>, ToolError> {
    array_arg(args, "metadata_filters")?
        .iter()
        .map(|v| {
            serde_json::from_value::<MetadataFilter>(v.clone()).map_err(|e| {
                ToolError::invalid_value("metadata_filters", &format!("invalid filter: {}", e))
            })
        })
        .collect()
}

fn parse_order_by(args: &Value) -> Result<Vec<OrderBy>, ToolError> {
    array_arg(args, "order_by")?
        .iter()
        .map(|v| {
            let column = v
                .get("column")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::invalid_value("order_by", "order_by entries need a column"))?
                .parse::<TaskColumn>()
                .map_err(|e| ToolError::invalid_value("order_by", &e))?;
            let direction = match v.get("direction").and_then(Value::as_str) {
                None => SortDirection::Asc,
                Some(d) if d.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Some(d) if d.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                Some(d) => {
                    return Err(ToolError::invalid_value(
                        "order_by",
                        &format!("unknown sort direction: {}", d),
                    ));
                }
            };
            Ok(OrderBy { column, direction })
        })
        .collect()
}

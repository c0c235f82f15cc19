//! Project tools: bootstrap, lookup, listing, deletion and membership.

use super::{
    ToolHandler, empty, make_tool, optional_bool, optional_metadata, optional_string, require_bool,
    require_i64, require_string,
};
use crate::db::Database;
use crate::error::ToolError;
use crate::format::{
    OutputFormat, format_project_markdown, format_projects_markdown, markdown_to_json,
};
use crate::roles::ProjectRoles;
use crate::types::{NewProject, Page, Project, ProjectListQuery, ProjectUpdate};
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{Value, json};

pub fn get_tools() -> Vec<Tool> {
    let page = json!({ "type": "integer", "minimum": 1, "description": "1-indexed page (default 1)" });
    let page_size =
        json!({ "type": "integer", "minimum": 1, "description": "Items per page (capped by server config)" });

    vec![
        make_tool(
            "create_project",
            "Create a project together with its root task (weight 1, titled after the project, due duration_days from now). The caller becomes the project admin.",
            json!({
                "caller_id": { "type": "string", "description": "Creating user, becomes admin" },
                "name": { "type": "string", "minLength": 1, "maxLength": 1024 },
                "is_public": { "type": "boolean" },
                "duration_days": { "type": "integer", "minimum": 1, "description": "Root task deadline in days from now" },
                "type": { "type": "string", "description": "Project type (default \"default\")" },
                "metadata": { "type": "object", "description": "Free-form attributes" }
            }),
            vec!["caller_id", "name", "is_public", "duration_days"],
        ),
        make_tool(
            "get_project",
            "Get a project by ID.",
            json!({
                "project_id": { "type": "integer", "description": "Project ID" },
                "format": { "type": "string", "enum": ["json", "markdown"] }
            }),
            vec!["project_id"],
        ),
        make_tool(
            "list_projects",
            "List projects, newest first, optionally filtered by type and visibility.",
            json!({
                "type": { "type": "string", "description": "Only projects of this type" },
                "is_public": { "type": "boolean", "description": "Only public (true) or private (false) projects" },
                "page": page.clone(),
                "page_size": page_size.clone(),
                "format": { "type": "string", "enum": ["json", "markdown"] }
            }),
            vec![],
        ),
        make_tool(
            "list_joined_projects",
            "List the projects a user is a member of, newest first.",
            json!({
                "user_id": { "type": "string" },
                "page": page,
                "page_size": page_size,
                "format": { "type": "string", "enum": ["json", "markdown"] }
            }),
            vec!["user_id"],
        ),
        make_tool(
            "update_project",
            "Rename a project or change its visibility.",
            json!({
                "project_id": { "type": "integer", "description": "Project ID" },
                "name": { "type": "string", "minLength": 1, "maxLength": 1024 },
                "is_public": { "type": "boolean" }
            }),
            vec!["project_id"],
        ),
        make_tool(
            "delete_project",
            "Delete a project together with all of its tasks and memberships.",
            json!({
                "project_id": { "type": "integer", "description": "Project ID" }
            }),
            vec!["project_id"],
        ),
        make_tool(
            "add_project_member",
            "Add a user to a project as a member so tasks can be assigned to them.",
            json!({
                "project_id": { "type": "integer", "description": "Project ID" },
                "user_id": { "type": "string" }
            }),
            vec!["project_id", "user_id"],
        ),
    ]
}

fn render_projects(page: Page<Project>, format: OutputFormat) -> Result<Value> {
    match format {
        OutputFormat::Markdown => Ok(markdown_to_json(format_projects_markdown(&page))),
        OutputFormat::Json => Ok(serde_json::to_value(page)?),
    }
}

pub fn create_project(db: &Database, roles: &dyn ProjectRoles, args: Value) -> Result<Value> {
    let input = NewProject {
        name: require_string(&args, "name")?,
        is_public: require_bool(&args, "is_public")?,
        duration_days: require_i64(&args, "duration_days")?,
        user_id: require_string(&args, "caller_id")?,
        project_type: optional_string(&args, "type")?,
        metadata: optional_metadata(&args, "metadata")?,
    };
    let id = db.create_project(input, roles)?;
    Ok(json!({ "id": id }))
}

pub fn get_project(handler: &ToolHandler, args: Value) -> Result<Value> {
    let project_id = require_i64(&args, "project_id")?;
    let format = handler.format(&args)?;
    let project = handler.db.get_project(project_id)?;
    match format {
        OutputFormat::Markdown => Ok(markdown_to_json(format_project_markdown(&project))),
        OutputFormat::Json => Ok(serde_json::to_value(project)?),
    }
}

pub fn list_projects(handler: &ToolHandler, args: Value) -> Result<Value> {
    let format = handler.format(&args)?;
    let query = ProjectListQuery {
        project_type: optional_string(&args, "type")?,
        is_public: optional_bool(&args, "is_public")?,
        page: handler.page(&args)?,
    };
    render_projects(handler.db.list_projects(&query)?, format)
}

pub fn list_joined_projects(handler: &ToolHandler, args: Value) -> Result<Value> {
    let user_id = require_string(&args, "user_id")?;
    let format = handler.format(&args)?;
    let page = handler.page(&args)?;
    render_projects(handler.db.list_joined_projects(&user_id, page)?, format)
}

pub fn update_project(db: &Database, args: Value) -> Result<Value> {
    let project_id = require_i64(&args, "project_id")?;
    let update = ProjectUpdate {
        name: optional_string(&args, "name")?,
        is_public: optional_bool(&args, "is_public")?,
    };
    if update == ProjectUpdate::default() {
        return Err(ToolError::invalid_value(
            "project_id",
            "nothing to update: pass name or is_public",
        )
        .into());
    }
    db.update_project(project_id, update)?;
    Ok(empty())
}

pub fn delete_project(db: &Database, args: Value) -> Result<Value> {
    let project_id = require_i64(&args, "project_id")?;
    db.delete_project(project_id)?;
    Ok(empty())
}

pub fn add_project_member(db: &Database, args: Value) -> Result<Value> {
    let project_id = require_i64(&args, "project_id")?;
    let user_id = require_string(&args, "user_id")?;
    db.add_project_member(project_id, &user_id)?;
    Ok(empty())
}

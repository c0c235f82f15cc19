//! Tool-level flows through `ToolHandler`.

use project_tree_mcp::config::EngineConfig;
use project_tree_mcp::db::Database;
use project_tree_mcp::error::ToolError;
use project_tree_mcp::format::OutputFormat;
use project_tree_mcp::roles::{MemberTable, ProjectRoles};
use project_tree_mcp::tools::ToolHandler;
use rusqlite::Connection;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

fn handler(engine: EngineConfig) -> (TempDir, ToolHandler) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("tasks.db")).unwrap();
    (dir, ToolHandler::new(Arc::new(db), engine, OutputFormat::Json))
}

fn call(h: &ToolHandler, name: &str, args: Value) -> Value {
    h.call_tool(name, args)
        .unwrap_or_else(|e| panic!("{} failed: {}", name, e))
}

/// Serialized form of a failed call, as the server returns it.
fn error_json(h: &ToolHandler, name: &str, args: Value) -> Value {
    let err = h.call_tool(name, args).unwrap_err();
    let tool_err = err.downcast::<ToolError>().unwrap();
    serde_json::to_value(&tool_err).unwrap()
}

#[test]
fn project_lifecycle_end_to_end() {
    let (_dir, h) = handler(EngineConfig::default());

    let project = call(
        &h,
        "create_project",
        json!({"caller_id": "lead", "name": "Website", "is_public": false, "duration_days": 14, "type": "web"}),
    );
    let project_id = project["id"].as_i64().unwrap();
    let root = call(&h, "get_root_task", json!({"project_id": project_id}));
    let root_id = root["id"].as_i64().unwrap();

    // Subtasks need an assigned parent.
    let err = error_json(
        &h,
        "create_subtask",
        json!({"task_id": root_id, "caller_id": "lead", "title": "Design", "expiry_date": root["expiry_date"]}),
    );
    assert_eq!(err["code"], "UNASSIGNED_TASK");

    call(&h, "assign_self", json!({"task_id": root_id, "caller_id": "lead"}));
    call(&h, "add_project_member", json!({"project_id": project_id, "user_id": "dev"}));

    let mut ids = Vec::new();
    for (title, weight) in [("Design", 2), ("Build", 5)] {
        let created = call(
            &h,
            "create_subtask",
            json!({
                "task_id": root_id,
                "caller_id": "lead",
                "title": title,
                "expiry_date": root["expiry_date"],
                "weight": weight,
                "metadata": {"area": title.to_lowercase()}
            }),
        );
        ids.push(created["id"].as_i64().unwrap());
    }

    call(&h, "assign_task", json!({"task_id": ids[0], "user_id": "dev"}));
    call(&h, "start_task", json!({"task_id": ids[0]}));
    call(&h, "finish_task", json!({"task_id": ids[0]}));

    let mine = call(
        &h,
        "list_subtasks",
        json!({"task_id": root_id, "assignee": "dev"}),
    );
    assert_eq!(mine["pagination"]["total_items"], 1);

    let builds = call(
        &h,
        "list_subtasks",
        json!({"task_id": root_id, "metadata_filters": [{"key": "area", "value": "build"}]}),
    );
    assert_eq!(builds["items"][0]["id"], ids[1]);

    let err = error_json(&h, "finish_task", json!({"task_id": root_id}));
    assert_eq!(err["code"], "FINISH_PARENT_TASK_FORBIDDEN");

    call(&h, "cancel_task", json!({"task_id": ids[1]}));
    call(&h, "finish_task", json!({"task_id": root_id}));

    let root = call(&h, "get_task", json!({"task_id": root_id}));
    assert_eq!(root["status"], "finished");
    assert_eq!(root["progress"], 2);
    assert_eq!(root["children_weight"], 2);

    let err = error_json(&h, "update_task", json!({"task_id": root_id, "title": "Again"}));
    assert_eq!(err["code"], "INVALID_TASK_STATUS_FOR_UPDATE");

    let listed = call(&h, "list_projects", json!({"type": "web"}));
    assert_eq!(listed["items"][0]["is_public"], false);
}

#[test]
fn errors_carry_code_and_field() {
    let (_dir, h) = handler(EngineConfig::default());

    let err = error_json(&h, "get_task", json!({}));
    assert_eq!(err["code"], "MISSING_REQUIRED_FIELD");
    assert_eq!(err["field"], "task_id");

    let err = error_json(&h, "get_task", json!({"task_id": 42}));
    assert_eq!(err["code"], "TASK_NOT_FOUND");

    let err = error_json(&h, "get_root_task", json!({"project_id": 42}));
    assert_eq!(err["code"], "PROJECT_NOT_FOUND");

    let err = error_json(&h, "reopen_task", json!({"task_id": 1}));
    assert_eq!(err["code"], "UNKNOWN_TOOL");
}

#[test]
fn page_size_follows_engine_config() {
    let engine = EngineConfig {
        default_page_size: 2,
        max_page_size: 3,
        ..EngineConfig::default()
    };
    let (_dir, h) = handler(engine);
    for i in 0..4 {
        call(
            &h,
            "create_project",
            json!({"caller_id": "lead", "name": format!("p{}", i), "is_public": true, "duration_days": 1}),
        );
    }

    let page = call(&h, "list_projects", json!({}));
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["pagination"]["total_items"], 4);
    assert_eq!(page["items"][0]["name"], "p3");

    let err = error_json(&h, "list_projects", json!({"page_size": 4}));
    assert_eq!(err["code"], "INVALID_FIELD_VALUE");
    assert_eq!(err["field"], "page_size");
}

/// Everyone is a member; admin grants go to the member table.
struct OpenRoles;

impl ProjectRoles for OpenRoles {
    fn is_member(&self, _: &Connection, _: i64, _: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn grant_admin(&self, conn: &Connection, project_id: i64, user_id: &str) -> anyhow::Result<()> {
        MemberTable.grant_admin(conn, project_id, user_id)
    }
}

#[test]
fn membership_comes_from_the_roles_collaborator() {
    let (_dir, h) = handler(EngineConfig::default());
    let h = h.with_roles(Arc::new(OpenRoles));

    let project = call(
        &h,
        "create_project",
        json!({"caller_id": "lead", "name": "Open", "is_public": true, "duration_days": 3}),
    );
    let root = call(&h, "get_root_task", json!({"project_id": project["id"]}));

    call(&h, "assign_task", json!({"task_id": root["id"], "user_id": "outsider"}));
    let root = call(&h, "get_task", json!({"task_id": root["id"]}));
    assert_eq!(root["assignee"], "outsider");

    let joined = call(&h, "list_joined_projects", json!({"user_id": "lead"}));
    assert_eq!(joined["pagination"]["total_items"], 1);
}

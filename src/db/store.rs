//! Task row mapping and the atomic store primitives.
//!
//! Every function here takes a connection the caller has already placed in a
//! transaction (or a plain connection for reads). Nothing commits on its own.

use crate::lifecycle::{AggregateField, ChildrenGuard, TaskGuard, TaskPatch};
use crate::error::ToolError;
use crate::types::{
    FilterOp, Metadata, MetadataFilter, OrderBy, Page, Pagination, SubtaskQuery, Task,
    TaskListQuery, TaskStatus,
};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// How a task row is read inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read.
    Shared,
    /// Take the write lock on the row before reading it.
    ForUpdate,
}

/// Column values for a freshly inserted task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: i64,
    pub parent_id: Option<i64>,
    pub parents: Option<Vec<i64>>,
    pub user_id: String,
    pub weight: i64,
    pub title: String,
    pub metadata: Option<Metadata>,
    pub expiry_date: i64,
    pub created_date: i64,
}

type SqlParams = Vec<Box<dyn ToSql>>;

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let parents_json: Option<String> = row.get("parents")?;
    let metadata_json: Option<String> = row.get("metadata")?;

    Ok(Task {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        parent_id: row.get("parent_id")?,
        parents: decode_json(parents_json)?,
        user_id: row.get("user_id")?,
        assignee: row.get("assignee")?,
        weight: row.get("weight")?,
        children_count: row.get("children_count")?,
        children_weight: row.get("children_weight")?,
        progress: row.get("progress")?,
        status: parse_status(&status)?,
        title: row.get("title")?,
        metadata: decode_json(metadata_json)?,
        expiry_date: row.get("expiry_date")?,
        started_date: row.get("started_date")?,
        finished_date: row.get("finished_date")?,
        rejected_date: row.get("rejected_date")?,
        canceled_date: row.get("canceled_date")?,
        created_date: row.get("created_date")?,
        updated_date: row.get("updated_date")?,
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    raw.parse::<TaskStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))
}

/// Decode a nullable JSON text column. Malformed JSON is a row error.
pub fn decode_json<T: DeserializeOwned>(raw: Option<String>) -> rusqlite::Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read one task. `ForUpdate` touches the row first, which makes the
/// enclosing transaction hold the write lock until it ends.
pub fn get_task(conn: &Connection, task_id: i64, mode: LockMode) -> Result<Option<Task>> {
    if mode == LockMode::ForUpdate {
        let touched = conn.execute("UPDATE tasks SET id = id WHERE id = ?1", params![task_id])?;
        if touched == 0 {
            return Ok(None);
        }
    }

    let task = conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", params![task_id], parse_task_row)
        .optional()?;
    Ok(task)
}

/// Like [`get_task`] but a missing row is `TaskNotFound`.
pub fn require_task(conn: &Connection, task_id: i64, mode: LockMode) -> Result<Task> {
    get_task(conn, task_id, mode)?.ok_or_else(|| ToolError::task_not_found(task_id).into())
}

pub fn find_root(conn: &Connection, project_id: i64) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE project_id = ?1 AND parents IS NULL ORDER BY id LIMIT 1",
            params![project_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

pub fn insert_task(conn: &Connection, task: &NewTask) -> Result<i64> {
    let parents = task.parents.as_ref().map(serde_json::to_string).transpose()?;
    let metadata = task.metadata.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO tasks (
            project_id, parent_id, parents, user_id, weight, status, title,
            metadata, expiry_date, created_date, updated_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            task.project_id,
            task.parent_id,
            parents,
            task.user_id,
            task.weight,
            TaskStatus::Pending.as_str(),
            task.title,
            metadata,
            task.expiry_date,
            task.created_date,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_row(conn: &Connection, task_id: i64) -> Result<usize> {
    Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?)
}

/// Apply `patch` only if the row still satisfies `guard`. Returns the number
/// of rows changed; zero means the precondition no longer holds.
pub fn conditional_update(
    conn: &Connection,
    task_id: i64,
    guard: &TaskGuard,
    patch: &TaskPatch,
    now: i64,
) -> Result<usize> {
    let mut sets = vec!["updated_date = ?".to_string()];
    let mut params_vec: SqlParams = vec![Box::new(now)];

    let mut set = |column: &str, value: Box<dyn ToSql>| {
        sets.push(format!("{} = ?", column));
        params_vec.push(value);
    };

    if let Some(status) = patch.status {
        set("status", Box::new(status.as_str()));
    }
    if let Some(ref assignee) = patch.assignee {
        set("assignee", Box::new(assignee.clone()));
    }
    if let Some(ref title) = patch.title {
        set("title", Box::new(title.clone()));
    }
    if let Some(weight) = patch.weight {
        set("weight", Box::new(weight));
    }
    if let Some(expiry) = patch.expiry_date {
        set("expiry_date", Box::new(expiry));
    }
    if let Some(ref metadata) = patch.metadata {
        set("metadata", Box::new(serde_json::to_string(metadata)?));
    }
    if let Some(ts) = patch.started_date {
        set("started_date", Box::new(ts));
    }
    if let Some(ts) = patch.finished_date {
        set("finished_date", Box::new(ts));
    }
    if let Some(ts) = patch.rejected_date {
        set("rejected_date", Box::new(ts));
    }
    if let Some(ts) = patch.canceled_date {
        set("canceled_date", Box::new(ts));
    }

    let mut sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));
    params_vec.push(Box::new(task_id));

    if let Some(statuses) = guard.statuses {
        sql.push_str(&format!(" AND status IN ({})", placeholders(statuses.len())));
        for status in statuses {
            params_vec.push(Box::new(status.as_str()));
        }
    }
    match guard.children {
        Some(ChildrenGuard::None) => sql.push_str(" AND children_count = 0"),
        Some(ChildrenGuard::Some) => sql.push_str(" AND children_count > 0"),
        None => {}
    }
    if guard.progress_complete {
        sql.push_str(" AND progress = children_weight");
    }
    if guard.unassigned {
        sql.push_str(" AND assignee IS NULL");
    }

    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    Ok(conn.execute(&sql, params_refs.as_slice())?)
}

/// Database-side `field = field + delta` on one row.
pub fn increment_field(
    conn: &Connection,
    task_id: i64,
    field: AggregateField,
    delta: i64,
) -> Result<()> {
    let column = field.column_name();
    let changed = conn.execute(
        &format!("UPDATE tasks SET {col} = {col} + ?1 WHERE id = ?2", col = column),
        params![delta, task_id],
    )?;
    if changed == 0 {
        return Err(ToolError::internal(format!(
            "cannot adjust {} of missing task {}",
            column, task_id
        ))
        .into());
    }
    Ok(())
}

/// Direct children of `parent_id`, filtered, ordered and paged. No locking.
pub fn find_children(conn: &Connection, parent_id: i64, query: &SubtaskQuery) -> Result<Page<Task>> {
    let mut where_sql = String::from(" WHERE parent_id = ?");
    let mut params_vec: SqlParams = vec![Box::new(parent_id)];

    if let Some(ref user_id) = query.user_id {
        where_sql.push_str(" AND user_id = ?");
        params_vec.push(Box::new(user_id.clone()));
    }
    if let Some(ref assignee) = query.assignee {
        where_sql.push_str(" AND assignee = ?");
        params_vec.push(Box::new(assignee.clone()));
    }
    if !query.statuses.is_empty() {
        where_sql.push_str(&format!(" AND status IN ({})", placeholders(query.statuses.len())));
        for status in &query.statuses {
            params_vec.push(Box::new(status.as_str()));
        }
    }
    for filter in &query.metadata_filters {
        push_metadata_filter(&mut where_sql, &mut params_vec, filter);
    }

    let total_items = if query.is_unfiltered() {
        conn.query_row(
            "SELECT children_count FROM tasks WHERE id = ?1",
            params![parent_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    } else {
        count(conn, &format!("SELECT COUNT(*) FROM tasks{}", where_sql), &params_vec)?
    };

    let sql = format!(
        "SELECT * FROM tasks{} ORDER BY {} LIMIT ? OFFSET ?",
        where_sql,
        build_order_clause(&query.order_by)
    );
    params_vec.push(Box::new(query.page.limit()));
    params_vec.push(Box::new(query.page.offset()));
    let items = query_tasks(conn, &sql, &params_vec)?;

    Ok(Page {
        items,
        pagination: Pagination {
            page: query.page.page,
            page_size: query.page.page_size,
            total_items,
        },
    })
}

/// All tasks of a project, optionally narrowed by creator and id list.
pub fn find_tasks(conn: &Connection, project_id: i64, query: &TaskListQuery) -> Result<Page<Task>> {
    let mut where_sql = String::from(" WHERE project_id = ?");
    let mut params_vec: SqlParams = vec![Box::new(project_id)];

    if let Some(ref user_id) = query.user_id {
        where_sql.push_str(" AND user_id = ?");
        params_vec.push(Box::new(user_id.clone()));
    }
    if !query.ids.is_empty() {
        where_sql.push_str(&format!(" AND id IN ({})", placeholders(query.ids.len())));
        for id in &query.ids {
            params_vec.push(Box::new(*id));
        }
    }

    let total_items = count(conn, &format!("SELECT COUNT(*) FROM tasks{}", where_sql), &params_vec)?;

    let sql = format!("SELECT * FROM tasks{} ORDER BY id ASC LIMIT ? OFFSET ?", where_sql);
    params_vec.push(Box::new(query.page.limit()));
    params_vec.push(Box::new(query.page.offset()));
    let items = query_tasks(conn, &sql, &params_vec)?;

    Ok(Page {
        items,
        pagination: Pagination {
            page: query.page.page,
            page_size: query.page.page_size,
            total_items,
        },
    })
}

/// Build an ORDER BY clause from whitelisted columns, ending with `id` so
/// pages are stable.
fn build_order_clause(order_by: &[OrderBy]) -> String {
    let mut parts: Vec<String> = order_by
        .iter()
        .map(|o| format!("{} {}", o.column.column_name(), o.direction.as_sql()))
        .collect();
    if !order_by.iter().any(|o| o.column.column_name() == "id") {
        parts.push("id ASC".to_string());
    }
    parts.join(", ")
}

/// Keys are validated to `[A-Za-z0-9_-]` before they get here.
fn push_metadata_filter(sql: &mut String, params_vec: &mut SqlParams, filter: &MetadataFilter) {
    let path = format!("json_extract(metadata, '$.\"{}\"')", filter.key);
    match (&filter.value, filter.op) {
        (Value::Null, FilterOp::Eq) => sql.push_str(&format!(" AND {} IS NULL", path)),
        (Value::Null, FilterOp::Ne) => sql.push_str(&format!(" AND {} IS NOT NULL", path)),
        (value, op) => {
            sql.push_str(&format!(" AND {} {} ?", path, op.as_sql()));
            params_vec.push(json_scalar(value));
        }
    }
}

/// SQLite's `json_extract` yields integers for JSON booleans.
fn json_scalar(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Bool(b) => Box::new(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Box::new(i),
            None => Box::new(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn count(conn: &Connection, sql: &str, params_vec: &SqlParams) -> Result<i64> {
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    Ok(conn.query_row(sql, params_refs.as_slice(), |row| row.get(0))?)
}

fn query_tasks(conn: &Connection, sql: &str, params_vec: &SqlParams) -> Result<Vec<Task>> {
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let tasks = stmt
        .query_map(params_refs.as_slice(), parse_task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

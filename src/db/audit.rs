//! Read-only recount of parent aggregates.

use super::Database;
use anyhow::Result;
use rusqlite::{ToSql, params};
use serde::Serialize;

/// A task whose stored aggregates disagree with its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateMismatch {
    pub task_id: i64,
    pub project_id: i64,
    pub stored_children_count: i64,
    pub actual_children_count: i64,
    pub stored_children_weight: i64,
    pub actual_children_weight: i64,
}

impl Database {
    /// Recount `children_count` and `children_weight` of every task (or
    /// every task of one project) from its direct children.
    pub fn audit_aggregates(&self, project_id: Option<i64>) -> Result<Vec<AggregateMismatch>> {
        let mut sql = String::from(
            "SELECT t.id, t.project_id, t.children_count, t.children_weight,
                    COUNT(c.id),
                    COALESCE(SUM(CASE WHEN c.status IN ('rejected', 'canceled') THEN 0 ELSE c.weight END), 0)
             FROM tasks t
             LEFT JOIN tasks c ON c.parent_id = t.id",
        );
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(project_id) = project_id {
            sql.push_str(" WHERE t.project_id = ?");
            params_vec.push(Box::new(project_id));
        }
        sql.push_str(
            " GROUP BY t.id
              HAVING t.children_count <> COUNT(c.id)
                  OR t.children_weight <> COALESCE(SUM(CASE WHEN c.status IN ('rejected', 'canceled') THEN 0 ELSE c.weight END), 0)
              ORDER BY t.id",
        );

        self.with_conn(|conn| {
            let refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(refs.as_slice(), |row| {
                    Ok(AggregateMismatch {
                        task_id: row.get(0)?,
                        project_id: row.get(1)?,
                        stored_children_count: row.get(2)?,
                        stored_children_weight: row.get(3)?,
                        actual_children_count: row.get(4)?,
                        actual_children_weight: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Number of tasks the audit looked at, for reporting.
    pub fn count_tasks(&self, project_id: Option<i64>) -> Result<i64> {
        self.with_conn(|conn| {
            let count = match project_id {
                Some(id) => conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE project_id = ?1",
                    params![id],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?,
            };
            Ok(count)
        })
    }
}

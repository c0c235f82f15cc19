//! Single-assignee claiming.

use super::store::{LockMode, conditional_update, get_task, require_task};
use super::{Database, now_ms};
use crate::error::ToolError;
use crate::lifecycle::{TaskGuard, TaskPatch};
use crate::roles::ProjectRoles;
use anyhow::Result;
use tracing::debug;

impl Database {
    /// Set the assignee if the task has none.
    ///
    /// Membership is decided by the caller and passed in as `is_member`. The
    /// write is one conditional `UPDATE ... WHERE assignee IS NULL`; no lock
    /// is taken and nothing is read first.
    pub fn assign_task(&self, task_id: i64, user_id: &str, is_member: bool) -> Result<()> {
        if !is_member {
            let task = self.with_conn(|conn| require_task(conn, task_id, LockMode::Shared))?;
            return Err(ToolError::user_not_in_project(user_id, task.project_id).into());
        }

        let patch = TaskPatch {
            assignee: Some(user_id.to_string()),
            ..Default::default()
        };
        self.with_conn(|conn| {
            if conditional_update(conn, task_id, &TaskGuard::unassigned(), &patch, now_ms())? == 0 {
                // Tell a missing task apart from a lost race.
                return match get_task(conn, task_id, LockMode::Shared)? {
                    None => Err(ToolError::task_not_found(task_id).into()),
                    Some(_) => Err(ToolError::already_assigned(task_id).into()),
                };
            }
            debug!(task_id, assignee = user_id, "Task assigned");
            Ok(())
        })
    }

    /// Assign the task to the caller.
    pub fn assign_self(&self, task_id: i64, caller_id: &str, is_member: bool) -> Result<()> {
        self.assign_task(task_id, caller_id, is_member)
    }

    /// Resolve membership through `roles`, then assign.
    pub fn assign_with_roles(
        &self,
        task_id: i64,
        user_id: &str,
        roles: &dyn ProjectRoles,
    ) -> Result<()> {
        let is_member = self.with_conn(|conn| {
            let task = require_task(conn, task_id, LockMode::Shared)?;
            roles.is_member(conn, task.project_id, user_id)
        })?;
        self.assign_task(task_id, user_id, is_member)
    }
}

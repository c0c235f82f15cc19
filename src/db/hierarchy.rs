//! Subtask creation, deletion, edits and status transitions.
//!
//! Each operation is one `IMMEDIATE` transaction. Parent aggregates are only
//! ever touched through [`increment_field`], never read-modified-written.

use super::store::{
    LockMode, NewTask, conditional_update, delete_row, find_children, find_root, find_tasks,
    increment_field, insert_task, require_task,
};
use super::{Database, now_ms};
use crate::error::ToolError;
use crate::lifecycle::{
    self, AggregateField, OPEN_STATUSES, TaskGuard, TaskPatch, Transition, check_deletable,
    check_editable, finish_conflict,
};
use crate::types::{NewSubtask, Page, SubtaskQuery, Task, TaskListQuery, TaskUpdate};
use crate::validation::{
    MAX_TASK_TITLE_LEN, validate_ids, validate_metadata, validate_metadata_filters,
    validate_statuses, validate_title, validate_weight,
};
use anyhow::Result;
use tracing::debug;

impl Database {
    /// Get a task by id.
    pub fn get_task(&self, task_id: i64) -> Result<Task> {
        self.with_conn(|conn| require_task(conn, task_id, LockMode::Shared))
    }

    /// The root task of a project.
    pub fn get_root_task(&self, project_id: i64) -> Result<Task> {
        self.with_conn(|conn| {
            super::projects::require_project(conn, project_id)?;
            find_root(conn, project_id)?
                .ok_or_else(|| ToolError::root_task_not_found(project_id).into())
        })
    }

    /// All tasks of a project.
    pub fn list_tasks(&self, project_id: i64, query: &TaskListQuery) -> Result<Page<Task>> {
        validate_ids(&query.ids)?;
        self.with_conn(|conn| {
            super::projects::require_project(conn, project_id)?;
            find_tasks(conn, project_id, query)
        })
    }

    /// Direct children of a task.
    pub fn list_subtasks(&self, task_id: i64, query: &SubtaskQuery) -> Result<Page<Task>> {
        validate_statuses(&query.statuses)?;
        validate_metadata_filters(&query.metadata_filters)?;
        self.with_conn(|conn| {
            require_task(conn, task_id, LockMode::Shared)?;
            find_children(conn, task_id, query)
        })
    }

    /// Create a subtask under an assigned, open parent.
    /// Returns the new task id.
    pub fn create_subtask(&self, input: NewSubtask) -> Result<i64> {
        validate_title("title", &input.title, MAX_TASK_TITLE_LEN)?;
        validate_weight(input.weight)?;
        if let Some(ref metadata) = input.metadata {
            validate_metadata(metadata)?;
        }
        let now = now_ms();

        self.with_tx(|tx| {
            let parent = require_task(tx, input.parent_id, LockMode::Shared)?;

            if input.expiry_date > parent.expiry_date {
                return Err(ToolError::invalid_expiry_date(parent.expiry_date).into());
            }
            if parent.assignee.is_none() {
                return Err(ToolError::unassigned_task(parent.id).into());
            }
            if !parent.status.is_editable() {
                return Err(
                    ToolError::invalid_status_for_update(parent.id, parent.status.as_str()).into(),
                );
            }

            let id = insert_task(
                tx,
                &NewTask {
                    project_id: parent.project_id,
                    parent_id: Some(parent.id),
                    parents: Some(parent.child_parents()),
                    user_id: input.user_id.clone(),
                    weight: input.weight,
                    title: input.title.clone(),
                    metadata: input.metadata.clone(),
                    expiry_date: input.expiry_date,
                    created_date: now,
                },
            )?;
            increment_field(tx, parent.id, AggregateField::ChildrenCount, 1)?;
            increment_field(tx, parent.id, AggregateField::ChildrenWeight, input.weight)?;

            debug!(task_id = id, parent_id = parent.id, weight = input.weight, "Subtask created");
            Ok(id)
        })
    }

    /// Delete a pending, childless, non-root task and shrink its parent's
    /// aggregates in the same transaction.
    pub fn delete_task(&self, task_id: i64) -> Result<()> {
        self.with_tx(|tx| {
            let task = require_task(tx, task_id, LockMode::ForUpdate)?;
            check_deletable(&task)?;

            if delete_row(tx, task_id)? == 0 {
                return Err(ToolError::task_not_found(task_id).into());
            }
            if let Some(parent_id) = task.parent_id {
                increment_field(tx, parent_id, AggregateField::ChildrenCount, -1)?;
                increment_field(tx, parent_id, AggregateField::ChildrenWeight, -task.weight)?;
            }

            debug!(task_id, parent_id = ?task.parent_id, weight = task.weight, "Task deleted");
            Ok(())
        })
    }

    /// Edit title, deadline, weight or metadata of an open task.
    ///
    /// A weight change moves the parent's `children_weight` by the signed
    /// difference. The deadline is checked against a fresh read of the
    /// parent; descendants are not re-checked against a tighter deadline.
    pub fn update_task(&self, task_id: i64, update: TaskUpdate) -> Result<()> {
        if let Some(ref title) = update.title {
            validate_title("title", title, MAX_TASK_TITLE_LEN)?;
        }
        if let Some(weight) = update.weight {
            validate_weight(weight)?;
        }
        if let Some(ref metadata) = update.metadata {
            validate_metadata(metadata)?;
        }
        let now = now_ms();

        self.with_tx(|tx| {
            let task = require_task(tx, task_id, LockMode::ForUpdate)?;
            check_editable(&task)?;

            if let (Some(parent_id), Some(expiry)) = (task.parent_id, update.expiry_date) {
                let parent = require_task(tx, parent_id, LockMode::Shared)?;
                if expiry > parent.expiry_date {
                    return Err(ToolError::invalid_expiry_date(parent.expiry_date).into());
                }
            }

            let patch = TaskPatch {
                title: update.title.clone(),
                weight: update.weight,
                expiry_date: update.expiry_date,
                metadata: update.metadata.clone(),
                ..Default::default()
            };
            let guard = TaskGuard::status_in(OPEN_STATUSES);
            if conditional_update(tx, task_id, &guard, &patch, now)? == 0 {
                return Err(
                    ToolError::invalid_status_for_update(task_id, task.status.as_str()).into(),
                );
            }

            let delta = update.weight.map_or(0, |w| w - task.weight);
            if delta != 0 {
                if let Some(parent_id) = task.parent_id {
                    increment_field(tx, parent_id, AggregateField::ChildrenWeight, delta)?;
                }
            }

            debug!(task_id, weight_delta = delta, "Task updated");
            Ok(())
        })
    }

    pub fn start_task(&self, task_id: i64) -> Result<()> {
        self.apply_transition(task_id, Transition::Start)
    }

    pub fn finish_task(&self, task_id: i64) -> Result<()> {
        self.apply_transition(task_id, Transition::Finish)
    }

    pub fn reject_task(&self, task_id: i64) -> Result<()> {
        self.apply_transition(task_id, Transition::Reject)
    }

    pub fn cancel_task(&self, task_id: i64) -> Result<()> {
        self.apply_transition(task_id, Transition::Cancel)
    }

    /// Lock the task, plan the transition against the locked snapshot, apply
    /// it with a guarded write, then push the effect onto the parent.
    fn apply_transition(&self, task_id: i64, transition: Transition) -> Result<()> {
        let now = now_ms();

        self.with_tx(|tx| {
            let task = require_task(tx, task_id, LockMode::ForUpdate)?;
            let plan =
                lifecycle::plan(transition, &task, now).map_err(|e| finish_conflict(&task, e))?;

            if conditional_update(tx, task_id, &plan.guard, &plan.patch, now)? == 0 {
                return Err(finish_conflict(&task, plan.conflict(task_id)).into());
            }
            if let Some(effect) = plan.parent_effect {
                increment_field(tx, effect.parent_id, effect.field, effect.delta)?;
            }

            debug!(
                task_id,
                transition = %transition,
                from = %task.status,
                to = %transition.target(),
                "Task transitioned"
            );
            Ok(())
        })
    }
}

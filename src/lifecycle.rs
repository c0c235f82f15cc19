//! Task lifecycle state machine.
//!
//! Pure decision logic: given a snapshot of a task and a requested transition,
//! either reject it with the precise conflict reason or produce a
//! [`TransitionPlan`] describing the guarded write and the effect on the
//! parent's aggregates. The database layer executes plans; nothing here does
//! I/O.
//!
//! ```text
//! pending ──start──▶ inprogress ──finish──▶ finished
//!    │  └──────────────finish─────────────────▲
//!    ├──reject──▶ rejected ◀──reject── inprogress
//!    └──cancel──▶ canceled
//! ```

use crate::error::{ErrorCode, ToolError};
use crate::types::{Task, TaskStatus};
use std::fmt;

/// Statuses from which a task can still be edited, rejected or finished.
pub const OPEN_STATUSES: &[TaskStatus] = &[TaskStatus::Pending, TaskStatus::InProgress];
const PENDING_ONLY: &[TaskStatus] = &[TaskStatus::Pending];

/// A requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Finish,
    Reject,
    Cancel,
}

impl Transition {
    pub fn target(self) -> TaskStatus {
        match self {
            Transition::Start => TaskStatus::InProgress,
            Transition::Finish => TaskStatus::Finished,
            Transition::Reject => TaskStatus::Rejected,
            Transition::Cancel => TaskStatus::Canceled,
        }
    }

    /// Statuses the transition may leave from.
    pub fn sources(self) -> &'static [TaskStatus] {
        match self {
            Transition::Start | Transition::Cancel => PENDING_ONLY,
            Transition::Finish | Transition::Reject => OPEN_STATUSES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Finish => "finish",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is an edge of the state machine.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    matches!(
        (from, to),
        (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::Pending, TaskStatus::Finished)
            | (TaskStatus::InProgress, TaskStatus::Finished)
            | (TaskStatus::Pending, TaskStatus::Rejected)
            | (TaskStatus::InProgress, TaskStatus::Rejected)
            | (TaskStatus::Pending, TaskStatus::Canceled)
    )
}

/// Condition on the children counter checked by the guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildrenGuard {
    /// No direct children.
    None,
    /// At least one direct child.
    Some,
}

/// Predicate the row must still satisfy when the write is applied. Evaluated
/// by the database against the current row, not against the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskGuard {
    pub statuses: Option<&'static [TaskStatus]>,
    pub children: Option<ChildrenGuard>,
    /// `progress = children_weight` on the current row.
    pub progress_complete: bool,
    /// `assignee IS NULL` on the current row.
    pub unassigned: bool,
}

impl TaskGuard {
    pub fn status_in(statuses: &'static [TaskStatus]) -> Self {
        Self {
            statuses: Some(statuses),
            ..Default::default()
        }
    }

    pub fn unassigned() -> Self {
        Self {
            unassigned: true,
            ..Default::default()
        }
    }

    pub fn with_children(mut self, children: ChildrenGuard) -> Self {
        self.children = Some(children);
        self
    }

    pub fn with_progress_complete(mut self) -> Self {
        self.progress_complete = true;
        self
    }
}

/// Fields written by a guarded update. `None` leaves the column untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub assignee: Option<String>,
    pub title: Option<String>,
    pub weight: Option<i64>,
    pub expiry_date: Option<i64>,
    pub metadata: Option<crate::types::Metadata>,
    pub started_date: Option<i64>,
    pub finished_date: Option<i64>,
    pub rejected_date: Option<i64>,
    pub canceled_date: Option<i64>,
}

/// Parent aggregate columns maintained by atomic increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateField {
    ChildrenCount,
    ChildrenWeight,
    Progress,
}

impl AggregateField {
    pub fn column_name(self) -> &'static str {
        match self {
            AggregateField::ChildrenCount => "children_count",
            AggregateField::ChildrenWeight => "children_weight",
            AggregateField::Progress => "progress",
        }
    }
}

/// Increment applied to the parent row after the task's own write succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentEffect {
    pub parent_id: i64,
    pub field: AggregateField,
    pub delta: i64,
}

/// Everything needed to apply one transition atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub transition: Transition,
    pub guard: TaskGuard,
    pub patch: TaskPatch,
    pub parent_effect: Option<ParentEffect>,
}

impl TransitionPlan {
    /// Error reported when the guarded write matched no row.
    pub fn conflict(&self, task_id: i64) -> ToolError {
        conflict_error(self.transition, task_id, "the task changed concurrently")
    }
}

/// Decide whether `transition` is legal for `task` and how to apply it.
pub fn plan(transition: Transition, task: &Task, now: i64) -> Result<TransitionPlan, ToolError> {
    if !is_valid_transition(task.status, transition.target()) {
        return Err(conflict_error(
            transition,
            task.id,
            &format!("status is '{}'", task.status),
        ));
    }

    let mut patch = TaskPatch {
        status: Some(transition.target()),
        ..Default::default()
    };

    let plan = match transition {
        Transition::Start => {
            patch.started_date = Some(now);
            TransitionPlan {
                transition,
                guard: TaskGuard::status_in(PENDING_ONLY),
                patch,
                parent_effect: None,
            }
        }
        Transition::Reject | Transition::Cancel => {
            if !task.is_leaf() {
                return Err(conflict_error(
                    transition,
                    task.id,
                    &format!("task has {} subtasks", task.children_count),
                ));
            }
            if transition == Transition::Reject {
                patch.rejected_date = Some(now);
            } else {
                patch.canceled_date = Some(now);
            }
            patch.weight = Some(0);
            TransitionPlan {
                transition,
                guard: TaskGuard::status_in(transition.sources())
                    .with_children(ChildrenGuard::None),
                patch,
                parent_effect: task.parent_id.map(|parent_id| ParentEffect {
                    parent_id,
                    field: AggregateField::ChildrenWeight,
                    delta: -task.weight,
                }),
            }
        }
        Transition::Finish => {
            let guard = if task.is_leaf() {
                TaskGuard::status_in(OPEN_STATUSES).with_children(ChildrenGuard::None)
            } else {
                if task.progress != task.children_weight {
                    return Err(conflict_error(
                        transition,
                        task.id,
                        &format!(
                            "subtask progress is {} of {}",
                            task.progress, task.children_weight
                        ),
                    ));
                }
                TaskGuard::status_in(OPEN_STATUSES)
                    .with_children(ChildrenGuard::Some)
                    .with_progress_complete()
            };
            patch.finished_date = Some(now);
            TransitionPlan {
                transition,
                guard,
                patch,
                parent_effect: task.parent_id.map(|parent_id| ParentEffect {
                    parent_id,
                    field: AggregateField::Progress,
                    delta: task.weight,
                }),
            }
        }
    };

    Ok(plan)
}

/// Check that the editable fields of `task` may change.
pub fn check_editable(task: &Task) -> Result<(), ToolError> {
    if !task.status.is_editable() {
        return Err(ToolError::invalid_status_for_update(task.id, task.status.as_str()));
    }
    Ok(())
}

/// Check the delete rule: non-root, childless, still pending.
pub fn check_deletable(task: &Task) -> Result<(), ToolError> {
    if task.is_root() {
        return Err(ToolError::delete_forbidden(task.id, "the root task cannot be deleted"));
    }
    if !task.is_leaf() {
        return Err(ToolError::delete_forbidden(
            task.id,
            &format!("task has {} subtasks", task.children_count),
        ));
    }
    if task.status != TaskStatus::Pending {
        return Err(ToolError::delete_forbidden(
            task.id,
            &format!("status is '{}'", task.status),
        ));
    }
    Ok(())
}

fn conflict_error(transition: Transition, task_id: i64, reason: &str) -> ToolError {
    let code = match transition {
        Transition::Start => ErrorCode::StartForbidden,
        Transition::Reject => ErrorCode::RejectForbidden,
        Transition::Cancel => ErrorCode::CancelForbidden,
        // Which finish error applies depends on the snapshot; the leaf form is
        // the default and the parent form is chosen by `finish_conflict`.
        Transition::Finish => ErrorCode::FinishSubtaskForbidden,
    };
    ToolError::new(
        code,
        format!("Cannot {} task {}: {}", transition, task_id, reason),
    )
}

/// A finish conflict on a task with subtasks reports the parent-specific code.
pub fn finish_conflict(task: &Task, err: ToolError) -> ToolError {
    if err.code == ErrorCode::FinishSubtaskForbidden && !task.is_leaf() {
        ToolError {
            code: ErrorCode::FinishParentTaskForbidden,
            ..err
        }
    } else {
        err
    }
}

//! Structured error types for engine and tool responses.

use crate::types::format_ms;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (4xx-like)
    MissingRequiredField,
    InvalidFieldValue,
    InvalidExpiryDate,

    // Not found errors
    TaskNotFound,
    ProjectNotFound,

    // Conflict errors
    AlreadyAssigned,
    UserNotInProject,
    UnassignedTask,
    InvalidTaskStatusForUpdate,
    StartForbidden,
    FinishSubtaskForbidden,
    FinishParentTaskForbidden,
    RejectForbidden,
    CancelForbidden,
    DeleteForbidden,

    // Concurrency errors
    LockTimeout,

    // Internal errors
    DatabaseError,
    InternalError,
    UnknownTool,
}

impl ErrorCode {
    /// Whether the caller may retry the same request after backing off.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::LockTimeout)
    }
}

/// Structured error for engine operations and tool responses.
#[derive(Debug, Serialize, Error)]
#[error("{message}")]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    /// The requested deadline is later than the parent's. The parent deadline
    /// travels in `details` (epoch milliseconds) so clients can correct it.
    pub fn invalid_expiry_date(parent_expiry_ms: i64) -> Self {
        Self::new(
            ErrorCode::InvalidExpiryDate,
            format!(
                "Expiry date must not be after the parent deadline {}",
                format_ms(parent_expiry_ms)
            ),
        )
        .with_field("expiry_date")
        .with_details(parent_expiry_ms.to_string())
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn root_task_not_found(project_id: i64) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Root task not found for project {}", project_id),
        )
    }

    pub fn project_not_found(project_id: i64) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project not found: {}", project_id),
        )
    }

    pub fn already_assigned(task_id: i64) -> Self {
        Self::new(
            ErrorCode::AlreadyAssigned,
            format!("Task {} already has an assignee", task_id),
        )
    }

    pub fn user_not_in_project(user_id: &str, project_id: i64) -> Self {
        Self::new(
            ErrorCode::UserNotInProject,
            format!("User {} is not a member of project {}", user_id, project_id),
        )
    }

    pub fn unassigned_task(task_id: i64) -> Self {
        Self::new(
            ErrorCode::UnassignedTask,
            format!("Task {} must be assigned before it can be split into subtasks", task_id),
        )
    }

    pub fn invalid_status_for_update(task_id: i64, status: &str) -> Self {
        Self::new(
            ErrorCode::InvalidTaskStatusForUpdate,
            format!("Task {} cannot be modified in status '{}'", task_id, status),
        )
    }

    pub fn delete_forbidden(task_id: i64, reason: &str) -> Self {
        Self::new(
            ErrorCode::DeleteForbidden,
            format!("Task {} cannot be deleted: {}", task_id, reason),
        )
    }

    pub fn lock_timeout(err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::LockTimeout,
            format!("Timed out waiting for the task lock: {}", err),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorCode::UnknownTool, format!("Unknown tool: {}", name))
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to ToolError first
        match err.downcast::<ToolError>() {
            Ok(tool_err) => tool_err,
            Err(err) => ToolError::internal(err),
        }
    }
}

/// Result type for tool operations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Extract the error code from an engine error, if it carries one.
pub fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.downcast_ref::<ToolError>().map(|e| e.code)
}

//! Core types for the project task tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Opaque key/value bag attached to tasks and projects.
pub type Metadata = Map<String, Value>;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Finished,
    Rejected,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Finished,
        TaskStatus::Rejected,
        TaskStatus::Canceled,
    ];

    /// Canonical storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "inprogress",
            TaskStatus::Finished => "finished",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Canceled => "canceled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Rejected | TaskStatus::Canceled
        )
    }

    /// Statuses in which title, weight, deadline and metadata may change.
    pub fn is_editable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "inprogress" | "in_progress" => Ok(TaskStatus::InProgress),
            "finished" => Ok(TaskStatus::Finished),
            "rejected" => Ok(TaskStatus::Rejected),
            "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// A task in a project tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub parent_id: Option<i64>,
    /// Ancestor ids from the root to the immediate parent; `None` for the root.
    pub parents: Option<Vec<i64>>,
    pub user_id: String,
    pub assignee: Option<String>,
    pub weight: i64,
    pub children_count: i64,
    pub children_weight: i64,
    pub progress: i64,
    pub status: TaskStatus,
    pub title: String,
    pub metadata: Option<Metadata>,
    pub expiry_date: i64,
    pub started_date: Option<i64>,
    pub finished_date: Option<i64>,
    pub rejected_date: Option<i64>,
    pub canceled_date: Option<i64>,
    pub created_date: i64,
    pub updated_date: i64,
}

impl Task {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children_count == 0
    }

    /// Ancestor path a child of this task inherits.
    pub fn child_parents(&self) -> Vec<i64> {
        let mut path = self.parents.clone().unwrap_or_default();
        path.push(self.id);
        path
    }
}

/// A project owning exactly one task tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    #[serde(rename = "type")]
    pub project_type: String,
    pub is_public: bool,
    pub user_id: String,
    pub name: String,
    pub metadata: Option<Metadata>,
    pub created_date: i64,
    pub updated_date: i64,
}

pub const DEFAULT_PROJECT_TYPE: &str = "default";

/// Pagination info returned with every listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_items: i64,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// 1-indexed page request, already clamped and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

/// Task columns that listings may be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskColumn {
    Id,
    UserId,
    Assignee,
    Weight,
    ChildrenCount,
    ChildrenWeight,
    Progress,
    Status,
    Title,
    ExpiryDate,
    StartedDate,
    FinishedDate,
    RejectedDate,
    CanceledDate,
    CreatedDate,
    UpdatedDate,
}

impl TaskColumn {
    pub fn column_name(self) -> &'static str {
        match self {
            TaskColumn::Id => "id",
            TaskColumn::UserId => "user_id",
            TaskColumn::Assignee => "assignee",
            TaskColumn::Weight => "weight",
            TaskColumn::ChildrenCount => "children_count",
            TaskColumn::ChildrenWeight => "children_weight",
            TaskColumn::Progress => "progress",
            TaskColumn::Status => "status",
            TaskColumn::Title => "title",
            TaskColumn::ExpiryDate => "expiry_date",
            TaskColumn::StartedDate => "started_date",
            TaskColumn::FinishedDate => "finished_date",
            TaskColumn::RejectedDate => "rejected_date",
            TaskColumn::CanceledDate => "canceled_date",
            TaskColumn::CreatedDate => "created_date",
            TaskColumn::UpdatedDate => "updated_date",
        }
    }
}

impl FromStr for TaskColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both snake_case and the camelCase names clients tend to send.
        let normalized: String = s
            .trim()
            .chars()
            .flat_map(|c| {
                if c.is_ascii_uppercase() {
                    vec!['_', c.to_ascii_lowercase()]
                } else {
                    vec![c]
                }
            })
            .collect();
        serde_json::from_value(Value::String(normalized))
            .map_err(|_| format!("unknown task column: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: TaskColumn,
    pub direction: SortDirection,
}

/// Comparison applied to one metadata attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// Predicate on a metadata key, e.g. `metadata.kind = "bug"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    #[serde(default)]
    pub op: FilterOp,
    pub value: Value,
}

/// Filters and paging for listing the direct children of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskQuery {
    /// Creator filter.
    pub user_id: Option<String>,
    pub assignee: Option<String>,
    pub statuses: Vec<TaskStatus>,
    pub metadata_filters: Vec<MetadataFilter>,
    pub order_by: Vec<OrderBy>,
    pub page: PageRequest,
}

impl SubtaskQuery {
    pub fn new(page: PageRequest) -> Self {
        Self {
            user_id: None,
            assignee: None,
            statuses: Vec::new(),
            metadata_filters: Vec::new(),
            order_by: Vec::new(),
            page,
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.user_id.is_none()
            && self.assignee.is_none()
            && self.statuses.is_empty()
            && self.metadata_filters.is_empty()
    }
}

/// Filters and paging for listing all tasks of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListQuery {
    pub user_id: Option<String>,
    pub ids: Vec<i64>,
    pub page: PageRequest,
}

/// Filters and paging for listing projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectListQuery {
    pub project_type: Option<String>,
    pub is_public: Option<bool>,
    pub page: PageRequest,
}

/// Input for creating a subtask.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubtask {
    pub parent_id: i64,
    pub user_id: String,
    pub title: String,
    pub expiry_date: i64,
    pub weight: i64,
    pub metadata: Option<Metadata>,
}

/// Partial update of a task's editable fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub expiry_date: Option<i64>,
    pub weight: Option<i64>,
    pub metadata: Option<Metadata>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.expiry_date.is_none()
            && self.weight.is_none()
            && self.metadata.is_none()
    }
}

/// Input for bootstrapping a project and its root task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub name: String,
    pub is_public: bool,
    /// Root task deadline, in days from now.
    pub duration_days: i64,
    pub user_id: String,
    pub project_type: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Partial update of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub is_public: Option<bool>,
}

/// Render epoch milliseconds as RFC 3339, falling back to the raw number.
pub fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

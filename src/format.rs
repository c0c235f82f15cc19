//! Output formatting for read tools: JSON or markdown.

use crate::types::{Page, Project, Task, TaskStatus, format_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Format a single task as markdown.
pub fn format_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task: {}\n", task.title));
    md.push_str(&format!("- **id**: `{}`\n", task.id));
    md.push_str(&format!("- **status**: {}\n", task.status));
    md.push_str(&format!("- **weight**: {}\n", task.weight));

    if let Some(parent_id) = task.parent_id {
        md.push_str(&format!("- **parent_id**: `{}`\n", parent_id));
    }
    if let Some(ref assignee) = task.assignee {
        md.push_str(&format!("- **assignee**: {}\n", assignee));
    }
    if task.children_count > 0 {
        md.push_str(&format!(
            "- **subtasks**: {} ({})\n",
            task.children_count,
            progress_label(task)
        ));
    }
    md.push_str(&format!("- **expires**: {}\n", format_ms(task.expiry_date)));

    let closed = task
        .finished_date
        .or(task.rejected_date)
        .or(task.canceled_date)
        .filter(|_| task.status.is_terminal());
    if let Some(ts) = closed {
        md.push_str(&format!("- **closed**: {}\n", format_ms(ts)));
    } else if let Some(ts) = task.started_date {
        md.push_str(&format!("- **started**: {}\n", format_ms(ts)));
    }

    if let Some(ref metadata) = task.metadata {
        if !metadata.is_empty() {
            md.push_str("\n### Metadata\n");
            for (key, value) in metadata {
                md.push_str(&format!("- {}: {}\n", key, value));
            }
        }
    }

    md
}

/// Format a page of tasks as markdown, grouped by status in lifecycle order.
pub fn format_tasks_markdown(page: &Page<Task>) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "# Tasks ({} of {}, page {})\n\n",
        page.items.len(),
        page.pagination.total_items,
        page.pagination.page
    ));

    for status in TaskStatus::ALL {
        let group: Vec<&Task> = page.items.iter().filter(|t| t.status == status).collect();
        if group.is_empty() {
            continue;
        }
        md.push_str(&format!("## {}\n\n", status_heading(status)));
        for task in group {
            md.push_str(&format_task_short(task));
        }
        md.push('\n');
    }

    md
}

pub fn format_project_markdown(project: &Project) -> String {
    let visibility = if project.is_public { "public" } else { "private" };
    format!(
        "## Project: {}\n- **id**: `{}`\n- **type**: {}\n- **owner**: {}\n- **visibility**: {}\n",
        project.name, project.id, project.project_type, project.user_id, visibility
    )
}

pub fn format_projects_markdown(page: &Page<Project>) -> String {
    let mut md = format!(
        "# Projects ({} of {}, page {})\n\n",
        page.items.len(),
        page.pagination.total_items,
        page.pagination.page
    );
    for project in &page.items {
        md.push_str(&format!(
            "- {} `{}` @{}{}\n",
            project.name,
            project.id,
            project.user_id,
            if project.is_public { "" } else { " (private)" }
        ));
    }
    md
}

fn status_heading(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "Pending",
        TaskStatus::InProgress => "In Progress",
        TaskStatus::Finished => "Finished",
        TaskStatus::Rejected => "Rejected",
        TaskStatus::Canceled => "Canceled",
    }
}

fn progress_label(task: &Task) -> String {
    if task.children_weight == 0 {
        return "no live weight".to_string();
    }
    let percent = task.progress * 100 / task.children_weight;
    format!("{}/{} done, {}%", task.progress, task.children_weight, percent)
}

/// Format a task in short form for lists.
fn format_task_short(task: &Task) -> String {
    let assignee = task
        .assignee
        .as_ref()
        .map(|a| format!(" @{}", a))
        .unwrap_or_default();

    let subtasks = if task.children_count > 0 {
        format!(" [{}]", progress_label(task))
    } else {
        String::new()
    };

    format!(
        "- {} `{}` w={}{}{}\n",
        task.title, task.id, task.weight, assignee, subtasks
    )
}

/// Wrap markdown so every tool result is a JSON value.
pub fn markdown_to_json(md: String) -> Value {
    serde_json::json!({
        "format": "markdown",
        "content": md
    })
}

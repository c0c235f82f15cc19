//! End-to-end tests of the task tree rules on a file-backed database.

use anyhow::{Result, anyhow};
use project_tree_mcp::config::EngineConfig;
use project_tree_mcp::db::Database;
use project_tree_mcp::db::projects::DAY_MS;
use project_tree_mcp::error::{ErrorCode, error_code};
use project_tree_mcp::roles::{MemberTable, ProjectRoles};
use project_tree_mcp::types::{
    NewProject, NewSubtask, ProjectListQuery, SubtaskQuery, Task, TaskListQuery, TaskStatus,
    TaskUpdate,
};
use project_tree_mcp::validation::page_request;
use rusqlite::Connection;
use tempfile::TempDir;

fn open() -> (TempDir, Database) {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::open(dir.path().join("nested/dir/tasks.db")).expect("open database");
    (dir, db)
}

fn new_project(name: &str, duration_days: i64) -> NewProject {
    NewProject {
        name: name.into(),
        is_public: true,
        duration_days,
        user_id: "owner".into(),
        project_type: None,
        metadata: None,
    }
}

/// Project root, assigned to its owner.
fn root(db: &Database) -> Task {
    let project_id = db.create_project(new_project("Tree", 10), &MemberTable).unwrap();
    let root = db.get_root_task(project_id).unwrap();
    db.assign_task(root.id, "owner", true).unwrap();
    db.get_task(root.id).unwrap()
}

fn child(db: &Database, parent: &Task, weight: i64) -> Task {
    let id = db
        .create_subtask(NewSubtask {
            parent_id: parent.id,
            user_id: "owner".into(),
            title: "child".into(),
            expiry_date: parent.expiry_date,
            weight,
            metadata: None,
        })
        .unwrap();
    db.get_task(id).unwrap()
}

fn code<T>(result: Result<T>) -> Option<ErrorCode> {
    result.err().and_then(|e| error_code(&e))
}

#[test]
fn weight_round_trip_through_update_and_reject() {
    let (_dir, db) = open();
    let root = root(&db);
    let task = child(&db, &root, 5);
    assert_eq!(db.get_task(root.id).unwrap().children_weight, 5);

    db.update_task(
        task.id,
        TaskUpdate {
            weight: Some(8),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(db.get_task(root.id).unwrap().children_weight, 8);

    db.reject_task(task.id).unwrap();
    let task = db.get_task(task.id).unwrap();
    assert_eq!(task.weight, 0);
    assert!(task.rejected_date.is_some());
    let root = db.get_task(root.id).unwrap();
    assert_eq!(root.children_weight, 0);
    assert_eq!(root.children_count, 1);
}

#[test]
fn parent_finishes_only_with_full_progress() {
    let (_dir, db) = open();
    let root = root(&db);
    let mid = child(&db, &root, 2);
    db.assign_task(mid.id, "owner", true).unwrap();
    let mid = db.get_task(mid.id).unwrap();
    let a = child(&db, &mid, 3);
    let b = child(&db, &mid, 4);

    db.finish_task(a.id).unwrap();
    assert_eq!(db.get_task(mid.id).unwrap().progress, 3);
    assert_eq!(
        code(db.finish_task(mid.id)),
        Some(ErrorCode::FinishParentTaskForbidden)
    );

    db.finish_task(b.id).unwrap();
    let mid_now = db.get_task(mid.id).unwrap();
    assert_eq!(mid_now.progress, 7);
    assert_eq!(mid_now.children_weight, 7);

    db.finish_task(mid.id).unwrap();
    assert_eq!(db.get_task(mid.id).unwrap().status, TaskStatus::Finished);
    assert_eq!(db.get_task(root.id).unwrap().progress, 2);

    // Finishing twice must not bump the grandparent again.
    assert_eq!(
        code(db.finish_task(mid.id)),
        Some(ErrorCode::FinishParentTaskForbidden)
    );
    assert_eq!(db.get_task(root.id).unwrap().progress, 2);
    assert_eq!(code(db.finish_task(a.id)), Some(ErrorCode::FinishSubtaskForbidden));
}

#[test]
fn rejected_child_unblocks_parent_finish() {
    let (_dir, db) = open();
    let root = root(&db);
    let done = child(&db, &root, 2);
    let dropped = child(&db, &root, 5);

    db.finish_task(done.id).unwrap();
    assert!(db.finish_task(root.id).is_err());

    db.cancel_task(dropped.id).unwrap();
    let root_now = db.get_task(root.id).unwrap();
    assert_eq!(root_now.progress, root_now.children_weight);
    db.finish_task(root.id).unwrap();
}

#[test]
fn expiry_may_not_pass_the_parent() {
    let (_dir, db) = open();
    let root = root(&db);
    let deadline = root.expiry_date;

    let late = db.create_subtask(NewSubtask {
        parent_id: root.id,
        user_id: "owner".into(),
        title: "late".into(),
        expiry_date: deadline + DAY_MS,
        weight: 1,
        metadata: None,
    });
    let err = late.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::InvalidExpiryDate));
    let tool_err = err.downcast::<project_tree_mcp::error::ToolError>().unwrap();
    assert!(tool_err.details.unwrap().contains(&deadline.to_string()));

    let on_time = child(&db, &root, 1);
    assert_eq!(on_time.expiry_date, deadline);

    assert_eq!(
        code(db.update_task(
            on_time.id,
            TaskUpdate {
                expiry_date: Some(deadline + 1),
                ..Default::default()
            }
        )),
        Some(ErrorCode::InvalidExpiryDate)
    );
    assert_eq!(db.get_task(root.id).unwrap().children_count, 1);
}

#[test]
fn delete_guard_and_exact_decrement() {
    let (_dir, db) = open();
    let root = root(&db);

    assert_eq!(code(db.delete_task(root.id)), Some(ErrorCode::DeleteForbidden));

    let parent = child(&db, &root, 3);
    db.assign_task(parent.id, "owner", true).unwrap();
    let parent = db.get_task(parent.id).unwrap();
    let leaf = child(&db, &parent, 1);
    assert_eq!(code(db.delete_task(parent.id)), Some(ErrorCode::DeleteForbidden));

    let started = child(&db, &root, 2);
    db.start_task(started.id).unwrap();
    assert_eq!(code(db.delete_task(started.id)), Some(ErrorCode::DeleteForbidden));

    db.delete_task(leaf.id).unwrap();
    db.delete_task(parent.id).unwrap();
    assert_eq!(code(db.get_task(parent.id)), Some(ErrorCode::TaskNotFound));

    let root = db.get_task(root.id).unwrap();
    assert_eq!(root.children_count, 1);
    assert_eq!(root.children_weight, 2);
    assert!(db.audit_aggregates(None).unwrap().is_empty());
}

struct FailingRoles;

impl ProjectRoles for FailingRoles {
    fn is_member(&self, _: &Connection, _: i64, _: &str) -> Result<bool> {
        Ok(true)
    }

    fn grant_admin(&self, _: &Connection, _: i64, _: &str) -> Result<()> {
        Err(anyhow!("grant refused"))
    }
}

#[test]
fn bootstrap_is_all_or_nothing() {
    let (_dir, db) = open();
    assert!(db.create_project(new_project("Doomed", 5), &FailingRoles).is_err());
    assert_eq!(db.count_tasks(None).unwrap(), 0);

    let page = page_request(None, None, &EngineConfig::default()).unwrap();
    let projects = db
        .list_projects(&ProjectListQuery {
            project_type: None,
            is_public: None,
            page,
        })
        .unwrap();
    assert_eq!(projects.pagination.total_items, 0);

    let id = db.create_project(new_project("Kept", 5), &MemberTable).unwrap();
    let root = db.get_root_task(id).unwrap();
    assert_eq!(root.title, "Kept");
    assert_eq!(root.weight, 1);
    assert!(root.parents.is_none());
    assert_eq!(root.expiry_date - root.created_date, 5 * DAY_MS);
    assert_eq!(
        db.list_joined_projects("owner", page).unwrap().items[0].id,
        id
    );
}

#[test]
fn listings_are_capped_and_paginated() {
    let (_dir, db) = open();
    let root = root(&db);
    for weight in 1..=12 {
        child(&db, &root, weight);
    }
    let engine = EngineConfig::default();

    assert_eq!(
        page_request(Some(1), Some(101), &engine).unwrap_err().code,
        ErrorCode::InvalidFieldValue
    );
    assert_eq!(
        page_request(Some(0), None, &engine).unwrap_err().code,
        ErrorCode::InvalidFieldValue
    );

    let first = db
        .list_subtasks(root.id, &SubtaskQuery::new(page_request(None, None, &engine).unwrap()))
        .unwrap();
    assert_eq!(first.items.len(), 10);
    assert_eq!(first.pagination.total_items, 12);

    let second = db
        .list_subtasks(
            root.id,
            &SubtaskQuery::new(page_request(Some(2), None, &engine).unwrap()),
        )
        .unwrap();
    assert_eq!(second.items.len(), 2);
    assert!(second.items.iter().all(|t| t.parent_id == Some(root.id)));

    let too_many_ids = TaskListQuery {
        user_id: None,
        ids: (1..=21).collect(),
        page: page_request(None, None, &engine).unwrap(),
    };
    assert_eq!(
        code(db.list_tasks(root.project_id, &too_many_ids)),
        Some(ErrorCode::InvalidFieldValue)
    );

    let picked = TaskListQuery {
        user_id: Some("owner".into()),
        ids: vec![root.id],
        page: page_request(None, Some(100), &engine).unwrap(),
    };
    let page = db.list_tasks(root.project_id, &picked).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, root.id);
}

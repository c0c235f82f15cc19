//! Project bootstrap and the project read/update surface.

use super::store::{NewTask, decode_json, insert_task};
use super::{Database, now_ms};
use crate::error::ToolError;
use crate::roles::{MemberTable, ProjectRoles, Role};
use crate::types::{
    DEFAULT_PROJECT_TYPE, NewProject, Page, PageRequest, Pagination, Project, ProjectListQuery,
    ProjectUpdate,
};
use crate::validation::{MAX_PROJECT_NAME_LEN, validate_metadata, validate_title};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use tracing::{debug, info};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    let metadata_json: Option<String> = row.get("metadata")?;
    Ok(Project {
        id: row.get("id")?,
        project_type: row.get("type")?,
        is_public: row.get("is_public")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        metadata: decode_json(metadata_json)?,
        created_date: row.get("created_date")?,
        updated_date: row.get("updated_date")?,
    })
}

pub(crate) fn require_project(conn: &Connection, project_id: i64) -> Result<Project> {
    conn.query_row(
        "SELECT * FROM projects WHERE id = ?1",
        params![project_id],
        parse_project_row,
    )
    .optional()?
    .ok_or_else(|| ToolError::project_not_found(project_id).into())
}

/// Deadline of a new root task.
fn root_expiry(now: i64, duration_days: i64) -> Result<i64, ToolError> {
    if duration_days < 1 {
        return Err(ToolError::invalid_value(
            "duration_days",
            "duration_days must be at least 1",
        ));
    }
    duration_days
        .checked_mul(DAY_MS)
        .and_then(|span| now.checked_add(span))
        .ok_or_else(|| ToolError::invalid_value("duration_days", "duration_days is too large"))
}

impl Database {
    /// Create a project, its root task and the creator's admin grant in one
    /// transaction. A failed grant rolls back the project and the root task.
    pub fn create_project(&self, input: NewProject, roles: &dyn ProjectRoles) -> Result<i64> {
        validate_title("name", &input.name, MAX_PROJECT_NAME_LEN)?;
        if let Some(ref metadata) = input.metadata {
            validate_metadata(metadata)?;
        }
        let now = now_ms();
        let expiry_date = root_expiry(now, input.duration_days)?;
        let project_type = input
            .project_type
            .clone()
            .unwrap_or_else(|| DEFAULT_PROJECT_TYPE.to_string());
        let metadata = input.metadata.as_ref().map(serde_json::to_string).transpose()?;

        let (project_id, root_id) = self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO projects (type, is_public, user_id, name, metadata, created_date, updated_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![project_type, input.is_public, input.user_id, input.name, metadata, now],
            )?;
            let project_id = tx.last_insert_rowid();

            let root_id = insert_task(
                tx,
                &NewTask {
                    project_id,
                    parent_id: None,
                    parents: None,
                    user_id: input.user_id.clone(),
                    weight: 1,
                    title: input.name.clone(),
                    metadata: None,
                    expiry_date,
                    created_date: now,
                },
            )?;

            roles.grant_admin(tx, project_id, &input.user_id)?;
            Ok((project_id, root_id))
        })?;

        info!(project_id, root_id, owner = %input.user_id, "Project created");
        Ok(project_id)
    }

    pub fn get_project(&self, project_id: i64) -> Result<Project> {
        self.with_conn(|conn| require_project(conn, project_id))
    }

    /// Projects filtered by type and visibility, newest first.
    pub fn list_projects(&self, query: &ProjectListQuery) -> Result<Page<Project>> {
        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref project_type) = query.project_type {
            where_sql.push_str(" AND type = ?");
            params_vec.push(Box::new(project_type.clone()));
        }
        if let Some(is_public) = query.is_public {
            where_sql.push_str(" AND is_public = ?");
            params_vec.push(Box::new(is_public));
        }

        self.with_conn(|conn| {
            page_projects(
                conn,
                &format!("SELECT COUNT(*) FROM projects{}", where_sql),
                &format!("SELECT * FROM projects{} ORDER BY id DESC LIMIT ? OFFSET ?", where_sql),
                params_vec,
                query.page,
            )
        })
    }

    /// Projects the user is a member of, newest first.
    pub fn list_joined_projects(&self, user_id: &str, page: PageRequest) -> Result<Page<Project>> {
        let join = " FROM projects p JOIN project_members m ON m.project_id = p.id WHERE m.user_id = ?";
        self.with_conn(|conn| {
            page_projects(
                conn,
                &format!("SELECT COUNT(*){}", join),
                &format!("SELECT p.*{} ORDER BY p.id DESC LIMIT ? OFFSET ?", join),
                vec![Box::new(user_id.to_string())],
                page,
            )
        })
    }

    pub fn update_project(&self, project_id: i64, update: ProjectUpdate) -> Result<()> {
        if let Some(ref name) = update.name {
            validate_title("name", name, MAX_PROJECT_NAME_LEN)?;
        }
        let now = now_ms();

        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE projects SET
                    name = COALESCE(?1, name),
                    is_public = COALESCE(?2, is_public),
                    updated_date = ?3
                 WHERE id = ?4",
                params![update.name, update.is_public, now, project_id],
            )?;
            if changed == 0 {
                return Err(ToolError::project_not_found(project_id).into());
            }
            debug!(project_id, "Project updated");
            Ok(())
        })
    }

    /// Remove a project with its whole task tree and memberships.
    pub fn delete_project(&self, project_id: i64) -> Result<()> {
        self.with_tx(|tx| {
            require_project(tx, project_id)?;
            let tasks = tx.execute("DELETE FROM tasks WHERE project_id = ?1", params![project_id])?;
            tx.execute(
                "DELETE FROM project_members WHERE project_id = ?1",
                params![project_id],
            )?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
            info!(project_id, tasks, "Project deleted");
            Ok(())
        })
    }

    /// Add a user as a plain member. Existing memberships are left as they are.
    pub fn add_project_member(&self, project_id: i64, user_id: &str) -> Result<()> {
        let members = MemberTable;
        self.with_tx(|tx| {
            require_project(tx, project_id)?;
            if members.role_of(tx, project_id, user_id)?.is_none() {
                members.grant(tx, project_id, user_id, Role::Member, now_ms())?;
                debug!(project_id, user_id, "Member added");
            }
            Ok(())
        })
    }
}

fn page_projects(
    conn: &Connection,
    count_sql: &str,
    select_sql: &str,
    mut params_vec: Vec<Box<dyn ToSql>>,
    page: PageRequest,
) -> Result<Page<Project>> {
    let total_items: i64 = {
        let refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        conn.query_row(count_sql, refs.as_slice(), |row| row.get(0))?
    };

    params_vec.push(Box::new(page.limit()));
    params_vec.push(Box::new(page.offset()));
    let refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(select_sql)?;
    let items = stmt
        .query_map(refs.as_slice(), parse_project_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Page {
        items,
        pagination: Pagination {
            page: page.page,
            page_size: page.page_size,
            total_items,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, error_code};
    use anyhow::anyhow;

    struct RefusingRoles;

    impl ProjectRoles for RefusingRoles {
        fn is_member(&self, _: &Connection, _: i64, _: &str) -> Result<bool> {
            Ok(false)
        }

        fn grant_admin(&self, _: &Connection, _: i64, _: &str) -> Result<()> {
            Err(anyhow!("role service unavailable"))
        }
    }

    fn new_project(name: &str, owner: &str, is_public: bool) -> NewProject {
        NewProject {
            name: name.into(),
            is_public,
            duration_days: 3,
            user_id: owner.into(),
            project_type: None,
            metadata: None,
        }
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn bootstrap_creates_root_and_admin() {
        let db = Database::open_in_memory().unwrap();
        let before = now_ms();
        let id = db
            .create_project(new_project("Apollo", "owner", true), &MemberTable)
            .unwrap();

        let project = db.get_project(id).unwrap();
        assert_eq!(project.project_type, DEFAULT_PROJECT_TYPE);
        assert!(project.is_public);

        let root = db.get_root_task(id).unwrap();
        assert_eq!(root.title, "Apollo");
        assert_eq!(root.user_id, "owner");
        assert_eq!(root.parents, None);
        assert!(root.expiry_date >= before + 3 * DAY_MS);

        let role = db
            .with_conn(|conn| MemberTable.role_of(conn, id, "owner"))
            .unwrap();
        assert_eq!(role, Some(Role::Admin));
    }

    #[test]
    fn failed_grant_rolls_back_everything() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .create_project(new_project("Doomed", "owner", false), &RefusingRoles)
            .unwrap_err();
        assert!(err.to_string().contains("role service unavailable"));
        assert_eq!(count(&db, "projects"), 0);
        assert_eq!(count(&db, "tasks"), 0);
    }

    #[test]
    fn bootstrap_validates_input() {
        let db = Database::open_in_memory().unwrap();
        let mut zero_days = new_project("x", "owner", false);
        zero_days.duration_days = 0;
        let err = db.create_project(zero_days, &MemberTable).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::InvalidFieldValue));

        let long_name = new_project(&"n".repeat(MAX_PROJECT_NAME_LEN + 1), "owner", false);
        assert!(db.create_project(long_name, &MemberTable).is_err());
        assert_eq!(count(&db, "projects"), 0);
    }

    #[test]
    fn listings_filter_and_page() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_project(new_project("a", "ann", true), &MemberTable).unwrap();
        let b = db.create_project(new_project("b", "bob", false), &MemberTable).unwrap();
        let c = db.create_project(new_project("c", "ann", true), &MemberTable).unwrap();

        let public = db
            .list_projects(&ProjectListQuery {
                project_type: None,
                is_public: Some(true),
                page: PageRequest { page: 1, page_size: 10 },
            })
            .unwrap();
        assert_eq!(public.pagination.total_items, 2);
        assert_eq!(public.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![c, a]);

        db.add_project_member(b, "ann").unwrap();
        let joined = db
            .list_joined_projects("ann", PageRequest { page: 1, page_size: 2 })
            .unwrap();
        assert_eq!(joined.pagination.total_items, 3);
        assert_eq!(joined.items.len(), 2);
    }

    #[test]
    fn update_and_membership_on_missing_project() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_project(new_project("old", "owner", false), &MemberTable).unwrap();

        db.update_project(
            id,
            ProjectUpdate {
                name: Some("new".into()),
                is_public: None,
            },
        )
        .unwrap();
        let project = db.get_project(id).unwrap();
        assert_eq!(project.name, "new");
        assert!(!project.is_public);

        let err = db.update_project(99, ProjectUpdate::default()).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ProjectNotFound));
        let err = db.add_project_member(99, "x").unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ProjectNotFound));
    }

    #[test]
    fn delete_removes_tree_and_members_only_of_that_project() {
        let db = Database::open_in_memory().unwrap();
        let doomed = db
            .create_project(new_project("doomed", "owner", false), &MemberTable)
            .unwrap();
        let kept = db
            .create_project(new_project("kept", "owner", false), &MemberTable)
            .unwrap();

        let root = db.get_root_task(doomed).unwrap();
        db.assign_task(root.id, "owner", true).unwrap();
        let child = db
            .create_subtask(crate::types::NewSubtask {
                parent_id: root.id,
                user_id: "owner".into(),
                title: "child".into(),
                expiry_date: root.expiry_date,
                weight: 2,
                metadata: None,
            })
            .unwrap();
        db.add_project_member(doomed, "dev").unwrap();

        db.delete_project(doomed).unwrap();

        let gone = |result: Result<()>| result.err().and_then(|e| error_code(&e));
        assert_eq!(gone(db.get_project(doomed).map(drop)), Some(ErrorCode::ProjectNotFound));
        assert_eq!(gone(db.get_task(child).map(drop)), Some(ErrorCode::TaskNotFound));
        assert_eq!(gone(db.get_task(root.id).map(drop)), Some(ErrorCode::TaskNotFound));
        assert_eq!(count(&db, "tasks"), 1);
        assert_eq!(count(&db, "project_members"), 1);
        assert_eq!(db.get_root_task(kept).unwrap().title, "kept");

        let err = db.delete_project(doomed).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ProjectNotFound));
    }

    #[test]
    fn adding_admin_as_member_keeps_admin() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_project(new_project("p", "owner", false), &MemberTable).unwrap();
        db.add_project_member(id, "owner").unwrap();
        let role = db
            .with_conn(|conn| MemberTable.role_of(conn, id, "owner"))
            .unwrap();
        assert_eq!(role, Some(Role::Admin));
    }
}

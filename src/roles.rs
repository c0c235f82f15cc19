//! Project membership, as seen by the engine.
//!
//! The engine only asks two things of the outside world: whether a user
//! belongs to a project, and to make the creator of a new project its admin.
//! Both calls receive the connection of the caller's unit of work, so a grant
//! made during project creation commits or rolls back with it.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership collaborator.
pub trait ProjectRoles: Send + Sync {
    fn is_member(&self, conn: &Connection, project_id: i64, user_id: &str) -> Result<bool>;

    fn grant_admin(&self, conn: &Connection, project_id: i64, user_id: &str) -> Result<()>;
}

/// Memberships stored in the `project_members` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberTable;

impl MemberTable {
    /// Insert or overwrite a membership.
    pub fn grant(
        &self,
        conn: &Connection,
        project_id: i64,
        user_id: &str,
        role: Role,
        now: i64,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO project_members (project_id, user_id, role, created_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role",
            params![project_id, user_id, role.as_str(), now],
        )?;
        Ok(())
    }

    pub fn role_of(&self, conn: &Connection, project_id: i64, user_id: &str) -> Result<Option<Role>> {
        let role: Option<String> = conn
            .query_row(
                "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.map(|r| if r == "admin" { Role::Admin } else { Role::Member }))
    }
}

impl ProjectRoles for MemberTable {
    fn is_member(&self, conn: &Connection, project_id: i64, user_id: &str) -> Result<bool> {
        Ok(self.role_of(conn, project_id, user_id)?.is_some())
    }

    fn grant_admin(&self, conn: &Connection, project_id: i64, user_id: &str) -> Result<()> {
        self.grant(conn, project_id, user_id, Role::Admin, crate::db::now_ms())
    }
}

use rusqlite::{Connection, params};

use super::access::{self, Capability};
use super::db;
use super::models::Label;
use super::validation::normalize_color;
use crate::errors::{BoardError, BoardResult};

pub const LABEL_LIMIT: i64 = 20;

pub fn list_labels(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<Vec<Label>> {
    let access = access::project_access(conn, project_id, user_id)?;
    db::labels_for_project(conn, access.project.id)
}

pub fn create_label(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    name: &str,
    color: &str,
) -> BoardResult<Label> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::CreateLabel)?;

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM project_labels WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    if count >= LABEL_LIMIT {
        return Err(BoardError::LabelLimit { limit: LABEL_LIMIT });
    }

    conn.execute(
        "INSERT INTO project_labels (project_id, name, color) VALUES (?1, ?2, ?3)",
        params![project_id, name, normalize_color(color)],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(label_id = id, project_id, "Label created");
    Ok(conn.query_row(
        "SELECT id, project_id, name, color FROM project_labels WHERE id = ?1",
        params![id],
        db::label_from_row,
    )?)
}

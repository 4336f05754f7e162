use rusqlite::{Connection, OptionalExtension, params};

use super::access::{self, Capability};
use super::db;
use super::models::{Subtask, SubtaskUpdate};
use crate::errors::{BoardError, BoardResult};

pub const SUBTASK_LIMIT: i64 = 20;

/// Append a checklist item. Any active member may add one.
pub fn create_subtask(conn: &Connection, issue_id: i64, user_id: i64, title: &str) -> BoardResult<Subtask> {
    let access = access::issue_access(conn, issue_id, user_id)?;
    access::require(access.member.role, Capability::CreateSubtask)?;

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subtasks WHERE issue_id = ?1",
        params![issue_id],
        |row| row.get(0),
    )?;
    if count >= SUBTASK_LIMIT {
        return Err(BoardError::SubtaskLimit {
            limit: SUBTASK_LIMIT,
        });
    }

    conn.execute(
        "INSERT INTO subtasks (issue_id, title, position) VALUES (?1, ?2, ?3)",
        params![issue_id, title, count],
    )?;
    fetch(conn, issue_id, conn.last_insert_rowid())
}

/// Edit title / completion. Needs edit rights; authorship is irrelevant.
pub fn update_subtask(
    conn: &Connection,
    issue_id: i64,
    subtask_id: i64,
    user_id: i64,
    update: SubtaskUpdate,
) -> BoardResult<Subtask> {
    let access = access::issue_access(conn, issue_id, user_id)?;
    access::require(access.member.role, Capability::EditSubtask)?;
    let subtask = fetch(conn, issue_id, subtask_id)?;

    if let Some(title) = &update.title {
        conn.execute(
            "UPDATE subtasks SET title = ?1 WHERE id = ?2",
            params![title, subtask.id],
        )?;
    }
    if let Some(completed) = update.completed {
        conn.execute(
            "UPDATE subtasks SET completed = ?1 WHERE id = ?2",
            params![completed, subtask.id],
        )?;
    }
    fetch(conn, issue_id, subtask.id)
}

/// Rewrite positions to follow `ordered_ids`. Every id must belong to the
/// issue.
pub fn reorder_subtasks(
    conn: &Connection,
    issue_id: i64,
    user_id: i64,
    ordered_ids: &[i64],
) -> BoardResult<Vec<Subtask>> {
    let access = access::issue_access(conn, issue_id, user_id)?;
    access::require(access.member.role, Capability::ReorderSubtasks)?;

    let mut stmt =
        conn.prepare_cached("UPDATE subtasks SET position = ?1 WHERE id = ?2 AND issue_id = ?3")?;
    for (position, id) in ordered_ids.iter().enumerate() {
        if stmt.execute(params![position as i64, id, issue_id])? == 0 {
            return Err(BoardError::NotFound);
        }
    }
    db::subtasks_for_issue(conn, issue_id)
}

fn fetch(conn: &Connection, issue_id: i64, subtask_id: i64) -> BoardResult<Subtask> {
    conn.query_row(
        "SELECT id, issue_id, title, completed, position FROM subtasks WHERE id = ?1 AND issue_id = ?2",
        params![subtask_id, issue_id],
        db::subtask_from_row,
    )
    .optional()?
    .ok_or(BoardError::NotFound)
}

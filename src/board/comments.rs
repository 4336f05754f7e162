use rusqlite::{Connection, params};

use super::access::{self, Capability};
use super::{db, validation};
use super::models::{Comment, Page};
use crate::errors::{BoardError, BoardResult};

pub fn create_comment(conn: &Connection, issue_id: i64, user_id: i64, content: &str) -> BoardResult<Comment> {
    let access = access::issue_access(conn, issue_id, user_id)?;
    access::require(access.member.role, Capability::CreateComment)?;

    conn.execute(
        "INSERT INTO comments (issue_id, author_id, content) VALUES (?1, ?2, ?3)",
        params![issue_id, user_id, content],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(comment_id = id, issue_id, "Comment created");
    fetch(conn, id)
}

/// Oldest first.
pub fn list_comments(
    conn: &Connection,
    issue_id: i64,
    user_id: i64,
    page: i64,
    page_size: i64,
) -> BoardResult<Page<Comment>> {
    access::issue_access(conn, issue_id, user_id)?;
    let window = validation::pagination(page, page_size)?;

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE issue_id = ?1 AND deleted_at IS NULL",
        params![issue_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author_id, content, created_at, updated_at FROM comments
         WHERE issue_id = ?1 AND deleted_at IS NULL
         ORDER BY created_at, id LIMIT ?2 OFFSET ?3",
    )?;
    let items = stmt
        .query_map(
            params![issue_id, window.page_size, window.offset],
            db::comment_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Page {
        items,
        page: window.page,
        page_size: window.page_size,
        total,
    })
}

/// Authors can edit their own comments; owners and admins can edit any.
pub fn update_comment(conn: &Connection, comment_id: i64, user_id: i64, content: &str) -> BoardResult<Comment> {
    let comment = managed_comment(conn, comment_id, user_id)?;
    conn.execute(
        "UPDATE comments SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![content, comment.id],
    )?;
    fetch(conn, comment.id)
}

pub fn soft_delete_comment(conn: &Connection, comment_id: i64, user_id: i64) -> BoardResult<Comment> {
    let comment = managed_comment(conn, comment_id, user_id)?;
    conn.execute(
        "UPDATE comments SET deleted_at = datetime('now') WHERE id = ?1",
        params![comment.id],
    )?;
    tracing::info!(comment_id, "Comment deleted");
    Ok(comment)
}

/// The author keeps control of a comment even after leaving the team; anyone
/// else needs a live membership with moderation rights.
fn managed_comment(conn: &Connection, comment_id: i64, user_id: i64) -> BoardResult<Comment> {
    let comment = db::active_comment(conn, comment_id)?.ok_or(BoardError::NotFound)?;
    if comment.author_id == user_id {
        return Ok(comment.into_inner());
    }
    let access = access::issue_access(conn, comment.issue_id, user_id)?;
    if !access::can_manage_comment(access.member.role, comment.author_id, user_id) {
        return Err(BoardError::Forbidden);
    }
    Ok(comment.into_inner())
}

fn fetch(conn: &Connection, comment_id: i64) -> BoardResult<Comment> {
    db::active_comment(conn, comment_id)?
        .map(|c| c.into_inner())
        .ok_or(BoardError::NotFound)
}

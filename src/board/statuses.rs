use rusqlite::{Connection, params};

use super::access::{self, Capability};
use super::db;
use super::models::{NewStatus, Status, StatusKind, StatusPosition};
use super::validation::{self, normalize_color};
use crate::errors::{BoardError, BoardResult};

pub const CUSTOM_STATUS_LIMIT: i64 = 5;

/// Columns every new project starts with: (name, color, kind).
pub const DEFAULT_STATUSES: [(&str, &str, StatusKind); 3] = [
    ("Backlog", "#9CA3AF", StatusKind::Backlog),
    ("In Progress", "#2563EB", StatusKind::InProgress),
    ("Done", "#10B981", StatusKind::Done),
];

/// Insert the default columns for a freshly created project.
pub fn provision_default_statuses(conn: &Connection, project_id: i64) -> BoardResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO statuses (project_id, name, color, position, kind) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, (name, color, kind)) in DEFAULT_STATUSES.iter().enumerate() {
        stmt.execute(params![project_id, name, color, position as i64, kind.as_str()])?;
    }
    Ok(())
}

pub fn list_statuses(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<Vec<Status>> {
    let access = access::project_access(conn, project_id, user_id)?;
    db::statuses_for_project(conn, access.project.id)
}

/// Add a CUSTOM column after the existing ones.
pub fn create_status(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    input: NewStatus,
) -> BoardResult<Status> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::CreateStatus)?;
    validation::wip_limit(input.wip_limit)?;

    let statuses = db::statuses_for_project(conn, project_id)?;
    let custom = statuses
        .iter()
        .filter(|s| s.kind == StatusKind::Custom)
        .count() as i64;
    if custom >= CUSTOM_STATUS_LIMIT {
        return Err(BoardError::StatusLimit {
            limit: CUSTOM_STATUS_LIMIT,
        });
    }

    conn.execute(
        "INSERT INTO statuses (project_id, name, color, position, kind, wip_limit)
         VALUES (?1, ?2, ?3, ?4, 'CUSTOM', ?5)",
        params![
            project_id,
            input.name,
            normalize_color(&input.color),
            statuses.len() as i64,
            input.wip_limit,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(status_id = id, project_id, "Status created");
    fetch(conn, id, project_id)
}

/// Apply each `{status_id, position}` pair. Pairs are not checked to form a
/// permutation; unknown or foreign status ids fail with `InvalidStatus`.
pub fn reorder_statuses(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    positions: &[StatusPosition],
) -> BoardResult<Vec<Status>> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::ReorderStatuses)?;

    let mut stmt = conn.prepare_cached(
        "UPDATE statuses SET position = ?1 WHERE id = ?2 AND project_id = ?3 AND deleted_at IS NULL",
    )?;
    for pair in positions {
        if stmt.execute(params![pair.position, pair.status_id, project_id])? == 0 {
            return Err(BoardError::InvalidStatus);
        }
    }
    tracing::info!(project_id, count = positions.len(), "Statuses reordered");
    db::statuses_for_project(conn, project_id)
}

/// Change a column's WIP ceiling (0 = unlimited). Issues already over the
/// new limit stay where they are.
pub fn update_wip_limit(
    conn: &Connection,
    project_id: i64,
    status_id: i64,
    user_id: i64,
    wip_limit: i64,
) -> BoardResult<Status> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::ChangeWipLimit)?;
    validation::wip_limit(wip_limit)?;
    let status = db::active_status(conn, status_id, project_id)?.ok_or(BoardError::NotFound)?;

    conn.execute(
        "UPDATE statuses SET wip_limit = ?1 WHERE id = ?2",
        params![wip_limit, status.id],
    )?;
    tracing::info!(status_id, wip_limit, "WIP limit updated");
    fetch(conn, status.id, project_id)
}

fn fetch(conn: &Connection, status_id: i64, project_id: i64) -> BoardResult<Status> {
    db::active_status(conn, status_id, project_id)?
        .map(|s| s.into_inner())
        .ok_or(BoardError::NotFound)
}

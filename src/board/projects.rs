use rusqlite::{Connection, params};

use super::access::{self, Capability};
use super::db;
use super::models::{FavoriteState, NewProject, Project, ProjectSummary, ProjectUpdate};
use super::statuses::provision_default_statuses;
use crate::errors::{BoardError, BoardResult};

pub const PROJECT_LIMIT: i64 = 15;

/// Create a project with its default Backlog / In Progress / Done columns.
pub fn create_project(conn: &Connection, user_id: i64, input: NewProject) -> BoardResult<Project> {
    let member = access::team_access(conn, input.team_id, user_id)?;
    access::require(member.role, Capability::CreateProject)?;

    if db::count_active_projects(conn, input.team_id)? >= PROJECT_LIMIT {
        return Err(BoardError::ProjectLimit {
            limit: PROJECT_LIMIT,
        });
    }

    conn.execute(
        "INSERT INTO projects (team_id, name, description) VALUES (?1, ?2, ?3)",
        params![input.team_id, input.name, input.description],
    )?;
    let project_id = conn.last_insert_rowid();
    provision_default_statuses(conn, project_id)?;

    tracing::info!(project_id, team_id = input.team_id, "Project created");
    fetch(conn, project_id)
}

/// Projects of every team the user belongs to, or of one team, each
/// flagged with the user's favorite star.
pub fn list_projects(
    conn: &Connection,
    user_id: i64,
    team_id: Option<i64>,
) -> BoardResult<Vec<ProjectSummary>> {
    let team_ids: Vec<i64> = match team_id {
        Some(id) => vec![access::team_access(conn, id, user_id)?.team_id],
        None => db::memberships_for_user(conn, user_id)?
            .into_iter()
            .map(|m| m.team.id)
            .collect(),
    };
    let favorites = db::favorite_project_ids(conn, user_id)?;
    Ok(db::projects_for_teams(conn, &team_ids)?
        .into_iter()
        .map(|project| ProjectSummary {
            favorite: favorites.contains(&project.id),
            project,
        })
        .collect())
}

pub fn project_detail(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<Project> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::ViewProject)?;
    Ok(access.project.into_inner())
}

/// Star or unstar a project for the calling user. Returns the new state.
pub fn toggle_favorite(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<FavoriteState> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::ViewProject)?;

    let removed = conn.execute(
        "DELETE FROM project_favorites WHERE project_id = ?1 AND user_id = ?2",
        params![project_id, user_id],
    )?;
    if removed == 0 {
        conn.execute(
            "INSERT INTO project_favorites (project_id, user_id) VALUES (?1, ?2)",
            params![project_id, user_id],
        )?;
    }
    let favorite = removed == 0;
    tracing::debug!(project_id, user_id, favorite, "Project favorite toggled");
    Ok(FavoriteState { favorite })
}

pub fn update_project(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    update: ProjectUpdate,
) -> BoardResult<Project> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::EditProject)?;

    if let Some(name) = &update.name {
        conn.execute(
            "UPDATE projects SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![name, project_id],
        )?;
    }
    if let Some(description) = &update.description {
        conn.execute(
            "UPDATE projects SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![description, project_id],
        )?;
    }
    fetch(conn, project_id)
}

/// Archive an active project, or unarchive an archived one.
pub fn toggle_archive(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<Project> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::ArchiveProject)?;

    conn.execute(
        "UPDATE projects SET
             archived_at = CASE WHEN archived_at IS NULL THEN datetime('now') ELSE NULL END,
             updated_at = datetime('now')
         WHERE id = ?1",
        params![project_id],
    )?;
    fetch(conn, project_id)
}

pub fn soft_delete_project(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<Project> {
    let access = access::project_access(conn, project_id, user_id)?;
    access::require(access.member.role, Capability::DeleteProject)?;

    conn.execute(
        "UPDATE projects SET deleted_at = datetime('now') WHERE id = ?1",
        params![project_id],
    )?;
    tracing::info!(project_id, "Project deleted");
    Ok(access.project.into_inner())
}

fn fetch(conn: &Connection, project_id: i64) -> BoardResult<Project> {
    db::active_project(conn, project_id)?
        .map(|p| p.into_inner())
        .ok_or(BoardError::NotFound)
}

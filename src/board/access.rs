//! Role predicates and the membership paths every operation resolves through.
//!
//! Predicates are pure: they map a `TeamRole` to what it may do. The
//! resolvers (`project_access`, `issue_access`) turn "does this row exist for
//! this user" into `NotFound` so that non-members cannot probe ids.

use rusqlite::Connection;

use super::active::Active;
use super::db;
use super::models::{Issue, Project, TeamMember, TeamRole};
use crate::errors::{BoardError, BoardResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    // Any active member.
    ViewProject,
    CreateSubtask,
    ReorderSubtasks,
    CreateComment,
    LeaveTeam,
    // OWNER or ADMIN.
    CreateIssue,
    EditIssue,
    MoveIssue,
    DeleteIssue,
    EditSubtask,
    CreateStatus,
    ReorderStatuses,
    ChangeWipLimit,
    CreateLabel,
    ModerateComments,
    CreateProject,
    EditProject,
    ArchiveProject,
    RenameTeam,
    InviteMembers,
    RemoveMembers,
    // OWNER only.
    RemoveAdmins,
    ChangeRoles,
    DeleteProject,
    DeleteTeam,
}

impl Capability {
    pub const ALL: [Capability; 25] = [
        Self::ViewProject,
        Self::CreateSubtask,
        Self::ReorderSubtasks,
        Self::CreateComment,
        Self::LeaveTeam,
        Self::CreateIssue,
        Self::EditIssue,
        Self::MoveIssue,
        Self::DeleteIssue,
        Self::EditSubtask,
        Self::CreateStatus,
        Self::ReorderStatuses,
        Self::ChangeWipLimit,
        Self::CreateLabel,
        Self::ModerateComments,
        Self::CreateProject,
        Self::EditProject,
        Self::ArchiveProject,
        Self::RenameTeam,
        Self::InviteMembers,
        Self::RemoveMembers,
        Self::RemoveAdmins,
        Self::ChangeRoles,
        Self::DeleteProject,
        Self::DeleteTeam,
    ];
}

/// Whether `role` may perform `cap`.
pub fn can(role: TeamRole, cap: Capability) -> bool {
    use Capability::*;
    match cap {
        ViewProject | CreateSubtask | ReorderSubtasks | CreateComment => true,
        // The owner has to transfer ownership before leaving.
        LeaveTeam => role != TeamRole::Owner,
        CreateIssue | EditIssue | MoveIssue | DeleteIssue | EditSubtask | CreateStatus
        | ReorderStatuses | ChangeWipLimit | CreateLabel | ModerateComments | CreateProject
        | EditProject | ArchiveProject | RenameTeam | InviteMembers | RemoveMembers => {
            matches!(role, TeamRole::Owner | TeamRole::Admin)
        }
        RemoveAdmins | ChangeRoles | DeleteProject | DeleteTeam => role == TeamRole::Owner,
    }
}

pub fn can_edit_project(role: TeamRole) -> bool {
    can(role, Capability::EditIssue)
}

pub fn can_manage_team(role: TeamRole) -> bool {
    matches!(role, TeamRole::Owner | TeamRole::Admin)
}

/// Authors may always edit their own comments; moderators may edit any.
pub fn can_manage_comment(role: TeamRole, author_id: i64, user_id: i64) -> bool {
    author_id == user_id || can(role, Capability::ModerateComments)
}

pub fn require(role: TeamRole, cap: Capability) -> BoardResult<()> {
    if can(role, cap) {
        Ok(())
    } else {
        Err(BoardError::Forbidden)
    }
}

/// The caller's active membership of `team_id`, or `NotFound`.
pub fn team_access(conn: &Connection, team_id: i64, user_id: i64) -> BoardResult<Active<TeamMember>> {
    db::active_membership(conn, team_id, user_id)?.ok_or(BoardError::NotFound)
}

pub struct ProjectAccess {
    pub project: Active<Project>,
    pub member: Active<TeamMember>,
}

/// Resolve a live project and the caller's live membership of its team.
pub fn project_access(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<ProjectAccess> {
    let project = db::active_project(conn, project_id)?.ok_or(BoardError::NotFound)?;
    let member = team_access(conn, project.team_id, user_id)?;
    Ok(ProjectAccess { project, member })
}

pub struct IssueAccess {
    pub issue: Active<Issue>,
    pub project: Active<Project>,
    pub member: Active<TeamMember>,
}

/// Resolve a live issue, its live project, and the caller's membership.
pub fn issue_access(conn: &Connection, issue_id: i64, user_id: i64) -> BoardResult<IssueAccess> {
    let issue = db::active_issue(conn, issue_id)?.ok_or(BoardError::NotFound)?;
    let ProjectAccess { project, member } = project_access(conn, issue.project_id, user_id)?;
    Ok(IssueAccess {
        issue,
        project,
        member,
    })
}

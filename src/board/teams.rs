//! Team workspace: teams, membership roles, invitations and the activity log.

use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::access::{self, Capability};
use super::db::{self, sql_timestamp};
use super::models::*;
use crate::errors::{BoardError, BoardResult};

pub const INVITE_TTL_DAYS: i64 = 7;
pub const ACTIVITY_PAGE_LIMIT: i64 = 100;

/// An invite that was just written and still has to be delivered.
#[derive(Debug, Clone)]
pub struct IssuedInvite {
    pub invite: TeamInvite,
    pub team_name: String,
    pub invited_by: String,
}

// ── Teams ─────────────────────────────────────────────────────────────

/// Create a team; the creator becomes its OWNER.
pub fn create_team(conn: &Connection, user_id: i64, name: &str) -> BoardResult<Team> {
    let actor = actor_label(conn, user_id)?;
    conn.execute(
        "INSERT INTO teams (name, owner_id) VALUES (?1, ?2)",
        params![name, user_id],
    )?;
    let team_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO team_members (team_id, user_id, role) VALUES (?1, ?2, 'OWNER')",
        params![team_id, user_id],
    )?;
    log_activity(conn, team_id, user_id, "team_created", &format!("{actor} created the team"))?;
    tracing::info!(team_id, user_id, "Team created");
    fetch_team(conn, team_id)
}

pub fn list_teams(conn: &Connection, user_id: i64) -> BoardResult<Vec<TeamMembership>> {
    db::memberships_for_user(conn, user_id)
}

pub fn rename_team(conn: &Connection, team_id: i64, user_id: i64, name: &str) -> BoardResult<Team> {
    let member = access::team_access(conn, team_id, user_id)?;
    access::require(member.role, Capability::RenameTeam)?;
    conn.execute("UPDATE teams SET name = ?1 WHERE id = ?2", params![name, team_id])?;
    let actor = actor_label(conn, user_id)?;
    log_activity(
        conn,
        team_id,
        user_id,
        "team_renamed",
        &format!("{actor} renamed the team to {name}"),
    )?;
    fetch_team(conn, team_id)
}

/// Soft-delete the team and every membership; pending invites are dropped.
pub fn delete_team(conn: &Connection, team_id: i64, user_id: i64) -> BoardResult<()> {
    let member = access::team_access(conn, team_id, user_id)?;
    access::require(member.role, Capability::DeleteTeam)?;

    conn.execute(
        "UPDATE teams SET deleted_at = datetime('now') WHERE id = ?1",
        params![team_id],
    )?;
    conn.execute(
        "UPDATE team_members SET deleted_at = datetime('now') WHERE team_id = ?1 AND deleted_at IS NULL",
        params![team_id],
    )?;
    conn.execute("DELETE FROM team_invites WHERE team_id = ?1", params![team_id])?;
    let actor = actor_label(conn, user_id)?;
    log_activity(conn, team_id, user_id, "team_deleted", &format!("{actor} deleted the team"))?;
    tracing::info!(team_id, user_id, "Team deleted");
    Ok(())
}

pub fn leave_team(conn: &Connection, team_id: i64, user_id: i64) -> BoardResult<()> {
    let member = access::team_access(conn, team_id, user_id)?;
    if !access::can(member.role, Capability::LeaveTeam) {
        return Err(BoardError::Conflict(
            "Owner cannot leave. Transfer ownership or delete the team".into(),
        ));
    }
    conn.execute(
        "UPDATE team_members SET deleted_at = datetime('now') WHERE id = ?1",
        params![member.id],
    )?;
    let actor = actor_label(conn, user_id)?;
    log_activity(conn, team_id, user_id, "member_left", &format!("{actor} left the team"))?;
    Ok(())
}

// ── Members ───────────────────────────────────────────────────────────

pub fn kick_member(conn: &Connection, team_id: i64, member_id: i64, user_id: i64) -> BoardResult<TeamMember> {
    let caller = access::team_access(conn, team_id, user_id)?;
    access::require(caller.role, Capability::RemoveMembers)?;

    let target = db::active_member_by_id(conn, team_id, member_id)?.ok_or(BoardError::NotFound)?;
    match target.role {
        TeamRole::Owner => return Err(BoardError::Conflict("Cannot remove the team owner".into())),
        TeamRole::Admin => access::require(caller.role, Capability::RemoveAdmins)?,
        TeamRole::Member => {}
    }

    conn.execute(
        "UPDATE team_members SET deleted_at = datetime('now') WHERE id = ?1",
        params![target.id],
    )?;
    let actor = actor_label(conn, user_id)?;
    let removed = actor_label(conn, target.user_id)?;
    log_activity(
        conn,
        team_id,
        user_id,
        "member_removed",
        &format!("{actor} removed {removed}"),
    )?;
    Ok(target.into_inner())
}

/// Change a member's role. Promoting someone to OWNER transfers ownership:
/// the caller becomes ADMIN and the team's owner is updated.
pub fn change_role(
    conn: &Connection,
    team_id: i64,
    member_id: i64,
    user_id: i64,
    role: TeamRole,
) -> BoardResult<TeamMember> {
    let caller = access::team_access(conn, team_id, user_id)?;
    access::require(caller.role, Capability::ChangeRoles)?;

    let target = db::active_member_by_id(conn, team_id, member_id)?.ok_or(BoardError::NotFound)?;
    if target.user_id == caller.user_id {
        if role == TeamRole::Owner {
            return Ok(target.into_inner());
        }
        return Err(BoardError::Conflict(
            "Transfer ownership to another member first".into(),
        ));
    }

    let actor = actor_label(conn, user_id)?;
    let subject = actor_label(conn, target.user_id)?;
    conn.execute(
        "UPDATE team_members SET role = ?1 WHERE id = ?2",
        params![role.as_str(), target.id],
    )?;

    if role == TeamRole::Owner {
        conn.execute(
            "UPDATE teams SET owner_id = ?1 WHERE id = ?2",
            params![target.user_id, team_id],
        )?;
        conn.execute(
            "UPDATE team_members SET role = 'ADMIN' WHERE id = ?1",
            params![caller.id],
        )?;
        log_activity(
            conn,
            team_id,
            user_id,
            "ownership_transferred",
            &format!("{actor} transferred ownership to {subject}"),
        )?;
        tracing::info!(team_id, new_owner = target.user_id, "Team ownership transferred");
    } else {
        log_activity(
            conn,
            team_id,
            user_id,
            "role_changed",
            &format!("{actor} set {subject} role to {role}"),
        )?;
    }

    db::active_member_by_id(conn, team_id, target.id)?
        .map(|m| m.into_inner())
        .ok_or(BoardError::NotFound)
}

// ── Invites ───────────────────────────────────────────────────────────

/// Create or refresh the invite for `(team, email)` with a new token and a
/// fresh expiry.
pub fn invite_member(conn: &Connection, team_id: i64, user_id: i64, email: &str) -> BoardResult<IssuedInvite> {
    let caller = access::team_access(conn, team_id, user_id)?;
    access::require(caller.role, Capability::InviteMembers)?;
    let team = fetch_team(conn, team_id)?;

    let token = new_token();
    conn.execute(
        "INSERT INTO team_invites (team_id, email, token, expires_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(team_id, email) DO UPDATE SET
             token = excluded.token,
             expires_at = excluded.expires_at,
             accepted_at = NULL,
             created_by = excluded.created_by",
        params![team_id, email, token, invite_expiry(), user_id],
    )?;

    let actor = actor_label(conn, user_id)?;
    log_activity(conn, team_id, user_id, "invite_sent", &format!("{actor} invited {email}"))?;
    tracing::info!(team_id, "Invite issued");

    Ok(IssuedInvite {
        invite: invite_by_token(conn, &token)?.ok_or(BoardError::NotFound)?,
        team_name: team.name,
        invited_by: actor,
    })
}

/// Rotate an invite's token and expiry and clear any acceptance.
pub fn resend_invite(conn: &Connection, team_id: i64, invite_id: i64, user_id: i64) -> BoardResult<IssuedInvite> {
    let caller = access::team_access(conn, team_id, user_id)?;
    access::require(caller.role, Capability::InviteMembers)?;
    let team = fetch_team(conn, team_id)?;

    let token = new_token();
    let updated = conn.execute(
        "UPDATE team_invites SET token = ?1, expires_at = ?2, accepted_at = NULL
         WHERE id = ?3 AND team_id = ?4",
        params![token, invite_expiry(), invite_id, team_id],
    )?;
    if updated == 0 {
        return Err(BoardError::NotFound);
    }

    Ok(IssuedInvite {
        invite: invite_by_token(conn, &token)?.ok_or(BoardError::NotFound)?,
        team_name: team.name,
        invited_by: actor_label(conn, user_id)?,
    })
}

/// Public invite lookup; no membership needed.
pub fn invite_info(conn: &Connection, token: &str) -> BoardResult<InviteInfo> {
    conn.query_row(
        "SELECT i.email, i.team_id, t.name, i.expires_at FROM team_invites i
         JOIN teams t ON t.id = i.team_id
         WHERE i.token = ?1 AND t.deleted_at IS NULL",
        params![token],
        |row| {
            Ok(InviteInfo {
                email: row.get(0)?,
                team_id: row.get(1)?,
                team_name: row.get(2)?,
                expires_at: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(BoardError::NotFound)
}

/// Accept an invite as `user_id`. A previously removed member is
/// reactivated as MEMBER; an active member keeps their role. Returns the
/// team id.
pub fn accept_invite(conn: &Connection, token: &str, user_id: i64) -> BoardResult<i64> {
    let invite = conn
        .query_row(
            "SELECT i.id, i.team_id, t.name FROM team_invites i
             JOIN teams t ON t.id = i.team_id
             WHERE i.token = ?1 AND i.accepted_at IS NULL
               AND i.expires_at > datetime('now') AND t.deleted_at IS NULL",
            params![token],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
        )
        .optional()?;
    let Some((invite_id, team_id, team_name)) = invite else {
        return Err(BoardError::InviteInvalid);
    };

    conn.execute(
        "UPDATE team_invites SET accepted_at = datetime('now') WHERE id = ?1",
        params![invite_id],
    )?;

    let existing: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, deleted_at FROM team_members WHERE team_id = ?1 AND user_id = ?2",
            params![team_id, user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match existing {
        Some((member_id, Some(_))) => {
            conn.execute(
                "UPDATE team_members SET deleted_at = NULL, role = 'MEMBER' WHERE id = ?1",
                params![member_id],
            )?;
        }
        Some((_, None)) => {}
        None => {
            conn.execute(
                "INSERT INTO team_members (team_id, user_id, role) VALUES (?1, ?2, 'MEMBER')",
                params![team_id, user_id],
            )?;
        }
    }

    let actor = actor_label(conn, user_id)?;
    log_activity(
        conn,
        team_id,
        user_id,
        "invite_accepted",
        &format!("{actor} joined {team_name}"),
    )?;
    tracing::info!(team_id, user_id, "Invite accepted");
    Ok(team_id)
}

fn invite_by_token(conn: &Connection, token: &str) -> BoardResult<Option<TeamInvite>> {
    Ok(conn
        .query_row(
            "SELECT id, team_id, email, token, expires_at, accepted_at, created_by, created_at
             FROM team_invites WHERE token = ?1",
            params![token],
            |row| {
                Ok(TeamInvite {
                    id: row.get(0)?,
                    team_id: row.get(1)?,
                    email: row.get(2)?,
                    token: row.get(3)?,
                    expires_at: row.get(4)?,
                    accepted_at: row.get(5)?,
                    created_by: row.get(6)?,
                    created_at: row.get(7)?,
                })
            },
        )
        .optional()?)
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn invite_expiry() -> String {
    sql_timestamp(Utc::now() + Duration::days(INVITE_TTL_DAYS))
}

// ── Activity ──────────────────────────────────────────────────────────

pub fn list_activity(conn: &Connection, team_id: i64, user_id: i64) -> BoardResult<Vec<TeamActivity>> {
    access::team_access(conn, team_id, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, team_id, actor_id, kind, message, created_at FROM team_activities
         WHERE team_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![team_id, ACTIVITY_PAGE_LIMIT], |row| {
            Ok(TeamActivity {
                id: row.get(0)?,
                team_id: row.get(1)?,
                actor_id: row.get(2)?,
                kind: row.get(3)?,
                message: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn log_activity(conn: &Connection, team_id: i64, actor_id: i64, kind: &str, message: &str) -> BoardResult<()> {
    conn.execute(
        "INSERT INTO team_activities (team_id, actor_id, kind, message) VALUES (?1, ?2, ?3, ?4)",
        params![team_id, actor_id, kind, message],
    )?;
    Ok(())
}

/// How a user appears in activity messages.
fn actor_label(conn: &Connection, user_id: i64) -> BoardResult<String> {
    Ok(db::active_user(conn, user_id)?
        .map(|u| u.into_inner().email)
        .unwrap_or_else(|| format!("user {user_id}")))
}

fn fetch_team(conn: &Connection, team_id: i64) -> BoardResult<Team> {
    db::active_team(conn, team_id)?
        .map(|t| t.into_inner())
        .ok_or(BoardError::NotFound)
}

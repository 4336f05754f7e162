use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};

use super::active::Active;
use super::models::*;
use crate::errors::{BoardError, BoardResult};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> BoardResult<R>
    where
        F: FnOnce(&BoardDb) -> BoardResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| anyhow::anyhow!("DB task panicked: {}", e))?
    }

    /// Run `f` inside a unit of work: committed when it returns `Ok`,
    /// rolled back otherwise.
    pub async fn write<F, R>(&self, f: F) -> BoardResult<R>
    where
        F: FnOnce(&Connection) -> BoardResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |db| db.unit_of_work(f)).await
    }

    /// Run a read-only closure against the connection.
    pub async fn read<F, R>(&self, f: F) -> BoardResult<R>
    where
        F: FnOnce(&Connection) -> BoardResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |db| f(db.conn())).await
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// commands and tests; never from an async request path.
    pub fn lock_sync(&self) -> BoardResult<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner.lock().map_err(|_| BoardError::LockPoisoned)
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open a transaction, hand it to `f`, and commit only if `f` succeeds.
    /// Dropping the transaction on error (or panic) rolls it back.
    pub fn unit_of_work<R>(&self, f: impl FnOnce(&Connection) -> BoardResult<R>) -> BoardResult<R> {
        // DbHandle's Mutex already guarantees single-threaded access.
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS teams (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS team_members (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id),
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    role TEXT NOT NULL DEFAULT 'MEMBER',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT,
                    UNIQUE(team_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS team_invites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    email TEXT NOT NULL,
                    token TEXT NOT NULL UNIQUE,
                    expires_at TEXT NOT NULL,
                    accepted_at TEXT,
                    created_by INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(team_id, email)
                );

                CREATE TABLE IF NOT EXISTS team_activities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id),
                    actor_id INTEGER REFERENCES users(id),
                    kind TEXT NOT NULL,
                    message TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id),
                    name TEXT NOT NULL,
                    description TEXT,
                    archived_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS project_favorites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS statuses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    name TEXT NOT NULL,
                    color TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    kind TEXT NOT NULL DEFAULT 'CUSTOM',
                    wip_limit INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    status_id INTEGER NOT NULL REFERENCES statuses(id),
                    title TEXT NOT NULL,
                    description TEXT,
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    due_date TEXT,
                    assignee_id INTEGER REFERENCES users(id),
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    status_order INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS project_labels (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    name TEXT NOT NULL,
                    color TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS issue_labels (
                    issue_id INTEGER NOT NULL REFERENCES issues(id),
                    label_id INTEGER NOT NULL REFERENCES project_labels(id),
                    PRIMARY KEY (issue_id, label_id)
                );

                CREATE TABLE IF NOT EXISTS subtasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id INTEGER NOT NULL REFERENCES issues(id),
                    title TEXT NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    position INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id INTEGER NOT NULL REFERENCES issues(id),
                    author_id INTEGER NOT NULL REFERENCES users(id),
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS issue_histories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id INTEGER NOT NULL REFERENCES issues(id),
                    actor_id INTEGER NOT NULL REFERENCES users(id),
                    field TEXT NOT NULL,
                    old_value TEXT,
                    new_value TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TRIGGER IF NOT EXISTS issue_histories_no_update
                BEFORE UPDATE ON issue_histories
                BEGIN
                    SELECT RAISE(ABORT, 'issue history is append-only');
                END;

                CREATE TRIGGER IF NOT EXISTS issue_histories_no_delete
                BEFORE DELETE ON issue_histories
                BEGIN
                    SELECT RAISE(ABORT, 'issue history is append-only');
                END;

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_team_members_user ON team_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_projects_team ON projects(team_id);
                CREATE INDEX IF NOT EXISTS idx_statuses_project ON statuses(project_id, position);
                CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
                CREATE INDEX IF NOT EXISTS idx_issues_column ON issues(status_id, status_order);
                CREATE INDEX IF NOT EXISTS idx_labels_project ON project_labels(project_id);
                CREATE INDEX IF NOT EXISTS idx_subtasks_issue ON subtasks(issue_id, position);
                CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);
                CREATE INDEX IF NOT EXISTS idx_histories_issue ON issue_histories(issue_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

/// Format a timestamp the way SQLite's `datetime('now')` does, so stored
/// values compare lexicographically against it.
pub fn sql_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `?, ?, ?` for an `IN (...)` clause of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ── Users ─────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "u.id, u.email, u.name, u.created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn active_user(conn: &Connection, id: i64) -> BoardResult<Option<Active<User>>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1 AND u.deleted_at IS NULL");
    let user = conn.query_row(&sql, params![id], user_from_row).optional()?;
    Ok(user.map(Active::new))
}

pub fn active_user_by_email(conn: &Connection, email: &str) -> BoardResult<Option<Active<User>>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE lower(u.email) = lower(?1) AND u.deleted_at IS NULL"
    );
    let user = conn.query_row(&sql, params![email], user_from_row).optional()?;
    Ok(user.map(Active::new))
}

// ── Teams and memberships ─────────────────────────────────────────────

const TEAM_COLUMNS: &str = "t.id, t.name, t.owner_id, t.created_at";

pub(crate) fn team_from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn active_team(conn: &Connection, id: i64) -> BoardResult<Option<Active<Team>>> {
    let sql = format!("SELECT {TEAM_COLUMNS} FROM teams t WHERE t.id = ?1 AND t.deleted_at IS NULL");
    let team = conn.query_row(&sql, params![id], team_from_row).optional()?;
    Ok(team.map(Active::new))
}

/// Teams the user actively belongs to, with their role in each.
pub fn memberships_for_user(conn: &Connection, user_id: i64) -> BoardResult<Vec<TeamMembership>> {
    let sql = format!(
        "SELECT {TEAM_COLUMNS}, m.role FROM team_members m
         JOIN teams t ON t.id = m.team_id
         WHERE m.user_id = ?1 AND m.deleted_at IS NULL AND t.deleted_at IS NULL
         ORDER BY t.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((team_from_row(row)?, row.get::<_, String>(4)?))
    })?;
    let mut teams = Vec::new();
    for row in rows {
        let (team, role) = row?;
        teams.push(TeamMembership {
            team,
            role: parse_role(&role)?,
        });
    }
    Ok(teams)
}

const MEMBER_COLUMNS: &str = "m.id, m.team_id, m.user_id, m.role, m.created_at";

struct TeamMemberRow {
    id: i64,
    team_id: i64,
    user_id: i64,
    role: String,
    created_at: String,
}

impl TeamMemberRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            team_id: row.get(1)?,
            user_id: row.get(2)?,
            role: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_member(self) -> BoardResult<TeamMember> {
        Ok(TeamMember {
            id: self.id,
            team_id: self.team_id,
            user_id: self.user_id,
            role: parse_role(&self.role)?,
            created_at: self.created_at,
        })
    }
}

fn parse_role(role: &str) -> BoardResult<TeamRole> {
    TeamRole::from_str(role)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to parse team role")
        .map_err(BoardError::from)
}

fn query_member<P: Params>(conn: &Connection, sql: &str, params: P) -> BoardResult<Option<Active<TeamMember>>> {
    let row = conn.query_row(sql, params, TeamMemberRow::from_row).optional()?;
    row.map(|r| r.into_member().map(Active::new)).transpose()
}

/// The team-membership lookup: the user's live membership of a live team.
pub fn active_membership(
    conn: &Connection,
    team_id: i64,
    user_id: i64,
) -> BoardResult<Option<Active<TeamMember>>> {
    let sql = format!(
        "SELECT {MEMBER_COLUMNS} FROM team_members m
         JOIN teams t ON t.id = m.team_id
         WHERE m.team_id = ?1 AND m.user_id = ?2
           AND m.deleted_at IS NULL AND t.deleted_at IS NULL"
    );
    query_member(conn, &sql, params![team_id, user_id])
}

pub fn active_member_by_id(
    conn: &Connection,
    team_id: i64,
    member_id: i64,
) -> BoardResult<Option<Active<TeamMember>>> {
    let sql = format!(
        "SELECT {MEMBER_COLUMNS} FROM team_members m
         JOIN teams t ON t.id = m.team_id
         WHERE m.team_id = ?1 AND m.id = ?2
           AND m.deleted_at IS NULL AND t.deleted_at IS NULL"
    );
    query_member(conn, &sql, params![team_id, member_id])
}

// ── Projects ──────────────────────────────────────────────────────────

const PROJECT_COLUMNS: &str =
    "p.id, p.team_id, p.name, p.description, p.archived_at, p.created_at, p.updated_at";

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        team_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        archived_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn active_project(conn: &Connection, id: i64) -> BoardResult<Option<Active<Project>>> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p
         JOIN teams t ON t.id = p.team_id
         WHERE p.id = ?1 AND p.deleted_at IS NULL AND t.deleted_at IS NULL"
    );
    let project = conn.query_row(&sql, params![id], project_from_row).optional()?;
    Ok(project.map(Active::new))
}

/// Ids of the projects `user_id` has starred.
pub fn favorite_project_ids(conn: &Connection, user_id: i64) -> BoardResult<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT project_id FROM project_favorites WHERE user_id = ?1")?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<HashSet<i64>>>()?)
}

pub fn projects_for_teams(conn: &Connection, team_ids: &[i64]) -> BoardResult<Vec<Project>> {
    if team_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p
         WHERE p.deleted_at IS NULL AND p.team_id IN ({})
         ORDER BY p.created_at DESC, p.id DESC",
        placeholders(team_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(team_ids), project_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count_active_projects(conn: &Connection, team_id: i64) -> BoardResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE team_id = ?1 AND deleted_at IS NULL",
        params![team_id],
        |row| row.get(0),
    )?)
}

// ── Statuses ──────────────────────────────────────────────────────────

const STATUS_COLUMNS: &str = "s.id, s.project_id, s.name, s.color, s.position, s.kind, s.wip_limit";

struct StatusRow {
    id: i64,
    project_id: i64,
    name: String,
    color: String,
    position: i64,
    kind: String,
    wip_limit: i64,
}

impl StatusRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
            position: row.get(4)?,
            kind: row.get(5)?,
            wip_limit: row.get(6)?,
        })
    }

    fn into_status(self) -> BoardResult<Status> {
        let kind = StatusKind::from_str(&self.kind)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse status kind")?;
        Ok(Status {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            color: self.color,
            position: self.position,
            kind,
            wip_limit: self.wip_limit,
        })
    }
}

fn query_statuses<P: Params>(conn: &Connection, sql: &str, params: P) -> BoardResult<Vec<Status>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, StatusRow::from_row)?;
    let mut statuses = Vec::new();
    for row in rows {
        statuses.push(row?.into_status()?);
    }
    Ok(statuses)
}

/// A live status that belongs to `project_id`.
pub fn active_status(
    conn: &Connection,
    status_id: i64,
    project_id: i64,
) -> BoardResult<Option<Active<Status>>> {
    let sql = format!(
        "SELECT {STATUS_COLUMNS} FROM statuses s
         WHERE s.id = ?1 AND s.project_id = ?2 AND s.deleted_at IS NULL"
    );
    let status = query_statuses(conn, &sql, params![status_id, project_id])?
        .into_iter()
        .next();
    Ok(status.map(Active::new))
}

/// The lowest-positioned live BACKLOG status of a project.
pub fn backlog_status(conn: &Connection, project_id: i64) -> BoardResult<Option<Active<Status>>> {
    let sql = format!(
        "SELECT {STATUS_COLUMNS} FROM statuses s
         WHERE s.project_id = ?1 AND s.kind = 'BACKLOG' AND s.deleted_at IS NULL
         ORDER BY s.position, s.id LIMIT 1"
    );
    let status = query_statuses(conn, &sql, params![project_id])?.into_iter().next();
    Ok(status.map(Active::new))
}

pub fn statuses_for_project(conn: &Connection, project_id: i64) -> BoardResult<Vec<Status>> {
    let sql = format!(
        "SELECT {STATUS_COLUMNS} FROM statuses s
         WHERE s.project_id = ?1 AND s.deleted_at IS NULL
         ORDER BY s.position, s.id"
    );
    query_statuses(conn, &sql, params![project_id])
}

// ── Issues ────────────────────────────────────────────────────────────

const ISSUE_COLUMNS: &str = "i.id, i.project_id, i.status_id, i.title, i.description, i.priority, \
     i.due_date, i.assignee_id, i.owner_id, i.status_order, i.created_at, i.updated_at";

/// Intermediate row struct for reading issues before converting the
/// priority string into its typed value.
struct IssueRow {
    id: i64,
    project_id: i64,
    status_id: i64,
    title: String,
    description: Option<String>,
    priority: String,
    due_date: Option<String>,
    assignee_id: Option<i64>,
    owner_id: i64,
    status_order: i64,
    created_at: String,
    updated_at: String,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            status_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            priority: row.get(5)?,
            due_date: row.get(6)?,
            assignee_id: row.get(7)?,
            owner_id: row.get(8)?,
            status_order: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_issue(self) -> BoardResult<Issue> {
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse issue priority")?;
        Ok(Issue {
            id: self.id,
            project_id: self.project_id,
            status_id: self.status_id,
            title: self.title,
            description: self.description,
            priority,
            due_date: self.due_date,
            assignee_id: self.assignee_id,
            owner_id: self.owner_id,
            status_order: self.status_order,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Run an issue query. `sql` must select `ISSUE_COLUMNS` from `issues i`.
pub(crate) fn query_issues<P: Params>(conn: &Connection, sql: &str, params: P) -> BoardResult<Vec<Issue>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, IssueRow::from_row)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?.into_issue()?);
    }
    Ok(issues)
}

pub(crate) fn issue_columns() -> &'static str {
    ISSUE_COLUMNS
}

pub fn active_issue(conn: &Connection, id: i64) -> BoardResult<Option<Active<Issue>>> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues i WHERE i.id = ?1 AND i.deleted_at IS NULL");
    let issue = query_issues(conn, &sql, params![id])?.into_iter().next();
    Ok(issue.map(Active::new))
}

/// Active issues of one status column, ordered by `status_order`.
pub fn issues_in_status(conn: &Connection, status_id: i64) -> BoardResult<Vec<Issue>> {
    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues i
         WHERE i.status_id = ?1 AND i.deleted_at IS NULL
         ORDER BY i.status_order, i.id"
    );
    query_issues(conn, &sql, params![status_id])
}

/// Ids of the active issues in a column, in board order.
pub fn column_ids(conn: &Connection, status_id: i64) -> BoardResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM issues WHERE status_id = ?1 AND deleted_at IS NULL ORDER BY status_order, id",
    )?;
    let ids = stmt
        .query_map(params![status_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn count_active_issues(conn: &Connection, project_id: i64) -> BoardResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM issues WHERE project_id = ?1 AND deleted_at IS NULL",
        params![project_id],
        |row| row.get(0),
    )?)
}

pub fn count_in_status(conn: &Connection, status_id: i64) -> BoardResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM issues WHERE status_id = ?1 AND deleted_at IS NULL",
        params![status_id],
        |row| row.get(0),
    )?)
}

// ── Labels, subtasks, history ─────────────────────────────────────────

pub(crate) fn label_from_row(row: &Row<'_>) -> rusqlite::Result<Label> {
    Ok(Label {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
    })
}

pub fn labels_for_issue(conn: &Connection, issue_id: i64) -> BoardResult<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.project_id, l.name, l.color FROM project_labels l
         JOIN issue_labels il ON il.label_id = l.id
         WHERE il.issue_id = ?1 ORDER BY l.name, l.id",
    )?;
    let labels = stmt
        .query_map(params![issue_id], label_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(labels)
}

pub fn labels_for_project(conn: &Connection, project_id: i64) -> BoardResult<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.project_id, l.name, l.color FROM project_labels l
         WHERE l.project_id = ?1 ORDER BY l.name, l.id",
    )?;
    let labels = stmt
        .query_map(params![project_id], label_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(labels)
}

pub(crate) fn subtask_from_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        title: row.get(2)?,
        completed: row.get(3)?,
        position: row.get(4)?,
    })
}

pub fn subtasks_for_issue(conn: &Connection, issue_id: i64) -> BoardResult<Vec<Subtask>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, title, completed, position FROM subtasks
         WHERE issue_id = ?1 ORDER BY position, id",
    )?;
    let subtasks = stmt
        .query_map(params![issue_id], subtask_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subtasks)
}

/// Most recent history rows first.
pub fn histories_for_issue(conn: &Connection, issue_id: i64, limit: i64) -> BoardResult<Vec<IssueHistory>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, actor_id, field, old_value, new_value, created_at
         FROM issue_histories WHERE issue_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![issue_id, limit], |row| {
            Ok(IssueHistory {
                id: row.get(0)?,
                issue_id: row.get(1)?,
                actor_id: row.get(2)?,
                field: row.get(3)?,
                old_value: row.get(4)?,
                new_value: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Comments ──────────────────────────────────────────────────────────

pub(crate) fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn active_comment(conn: &Connection, id: i64) -> BoardResult<Option<Active<Comment>>> {
    let comment = conn
        .query_row(
            "SELECT id, issue_id, author_id, content, created_at, updated_at
             FROM comments WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            comment_from_row,
        )
        .optional()?;
    Ok(comment.map(Active::new))
}

// ── Tests ─────────────────────────────────────────────────────────────

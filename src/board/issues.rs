//! Board mutation engine: issue creation, update, move/reorder, soft delete.
//!
//! Every function here takes a `&Connection` that the caller has opened as a
//! unit of work (`BoardDb::unit_of_work` / `DbHandle::write`). A function
//! that returns `Err` may have written rows; the caller's rollback discards
//! them.
//!
//! Ordering invariant: within a status, the active issues' `status_order`
//! values are exactly `0..n`. Every path that adds an issue to a column,
//! removes one from it, or reorders it rewrites the affected columns whole.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ToSql, params};

use super::access::{self, Capability, IssueAccess, ProjectAccess};
use super::db;
use super::models::*;
use super::query;
use crate::errors::{BoardError, BoardResult};

pub const ISSUE_LIMIT: i64 = 200;
pub const LABELS_PER_ISSUE_LIMIT: usize = 5;

// ── Creation ──────────────────────────────────────────────────────────

/// Create an issue at the end of the project's backlog column.
pub fn create_issue(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    input: NewIssue,
) -> BoardResult<Issue> {
    let ProjectAccess { project, member } = access::project_access(conn, project_id, user_id)?;
    access::require(member.role, Capability::CreateIssue)?;

    if db::count_active_issues(conn, project.id)? >= ISSUE_LIMIT {
        return Err(BoardError::IssueLimit { limit: ISSUE_LIMIT });
    }

    let backlog = db::backlog_status(conn, project.id)?
        .ok_or(BoardError::MissingDefaultStatus {
            project_id: project.id,
        })?;

    validate_labels(conn, project.id, &input.labels)?;
    validate_assignee(conn, project.team_id, input.assignee_id)?;

    let status_order = db::count_in_status(conn, backlog.id)?;
    let due_date = parse_optional_date(input.due_date.as_deref());
    let priority = input.priority.unwrap_or_default();

    conn.execute(
        "INSERT INTO issues (project_id, status_id, title, description, priority, due_date, assignee_id, owner_id, status_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            project.id,
            backlog.id,
            input.title,
            input.description,
            priority.as_str(),
            due_date,
            input.assignee_id,
            user_id,
            status_order,
        ],
    )?;
    let id = conn.last_insert_rowid();
    replace_labels(conn, id, &input.labels)?;

    tracing::info!(issue_id = id, project_id = project.id, status_order, "Issue created");
    fetch(conn, id)
}

// ── Update ────────────────────────────────────────────────────────────

/// Apply a partial update. Each changed field leaves one history row.
pub fn update_issue(
    conn: &Connection,
    issue_id: i64,
    user_id: i64,
    update: IssueUpdate,
) -> BoardResult<IssueWithRelations> {
    let IssueAccess {
        issue,
        project,
        member,
    } = access::issue_access(conn, issue_id, user_id)?;
    access::require(member.role, Capability::EditIssue)?;

    if let Some(labels) = &update.labels {
        validate_labels(conn, project.id, labels)?;
    }
    if let Some(assignee) = update.assignee_id {
        validate_assignee(conn, project.team_id, assignee)?;
    }

    let before = issue.into_inner();

    if let Some(status_id) = update.status_id.filter(|id| *id != before.status_id) {
        let dest = db::active_status(conn, status_id, project.id)?.ok_or(BoardError::InvalidStatus)?;
        ensure_wip_capacity(conn, &dest)?;

        let mut dest_ids = db::column_ids(conn, dest.id)?;
        dest_ids.push(before.id);
        let origin_ids = without(db::column_ids(conn, before.status_id)?, before.id);
        write_column(conn, dest.id, &dest_ids)?;
        write_column(conn, before.status_id, &origin_ids)?;

        record_history(
            conn,
            before.id,
            user_id,
            "status",
            Some(&before.status_id.to_string()),
            Some(&dest.id.to_string()),
        )?;
    }

    if let Some(title) = &update.title {
        set_field(conn, before.id, "title", title)?;
        record_history(conn, before.id, user_id, "title", Some(&before.title), Some(title))?;
    }
    if let Some(description) = &update.description {
        set_field(conn, before.id, "description", description)?;
        record_history(
            conn,
            before.id,
            user_id,
            "description",
            before.description.as_deref(),
            description.as_deref(),
        )?;
    }
    if let Some(assignee) = update.assignee_id {
        set_field(conn, before.id, "assignee_id", &assignee)?;
        record_history(
            conn,
            before.id,
            user_id,
            "assignee",
            before.assignee_id.map(|id| id.to_string()).as_deref(),
            assignee.map(|id| id.to_string()).as_deref(),
        )?;
    }
    if let Some(due_date) = &update.due_date {
        let parsed = parse_optional_date(due_date.as_deref());
        set_field(conn, before.id, "due_date", &parsed)?;
        record_history(
            conn,
            before.id,
            user_id,
            "dueDate",
            before.due_date.as_deref(),
            parsed.as_deref(),
        )?;
    }
    if let Some(priority) = update.priority {
        set_field(conn, before.id, "priority", &priority.as_str())?;
        record_history(
            conn,
            before.id,
            user_id,
            "priority",
            Some(before.priority.as_str()),
            Some(priority.as_str()),
        )?;
    }
    if let Some(labels) = &update.labels {
        replace_labels(conn, before.id, labels)?;
        touch(conn, before.id)?;
    }

    tracing::info!(issue_id = before.id, "Issue updated");
    query::issue_with_relations(conn, fetch(conn, before.id)?)
}

// ── Move / reorder ────────────────────────────────────────────────────

/// Move an issue to `to_status_id` at index `to_order` (clamped into the
/// column). Moving within the same column is a reorder and ignores the WIP
/// limit; entering a different column enforces it.
pub fn move_issue(
    conn: &Connection,
    issue_id: i64,
    user_id: i64,
    to_status_id: i64,
    to_order: i64,
) -> BoardResult<MoveOutcome> {
    let IssueAccess {
        issue,
        project,
        member,
    } = access::issue_access(conn, issue_id, user_id)?;
    access::require(member.role, Capability::MoveIssue)?;

    let dest = db::active_status(conn, to_status_id, project.id)?.ok_or(BoardError::InvalidStatus)?;
    let from_status_id = issue.status_id;
    let changes_column = dest.id != from_status_id;

    if changes_column {
        ensure_wip_capacity(conn, &dest)?;

        let origin_ids = without(db::column_ids(conn, from_status_id)?, issue.id);
        write_column(conn, from_status_id, &origin_ids)?;

        let dest_ids = place(db::column_ids(conn, dest.id)?, issue.id, to_order);
        write_column(conn, dest.id, &dest_ids)?;
        touch(conn, issue.id)?;

        record_history(
            conn,
            issue.id,
            user_id,
            "status",
            Some(&from_status_id.to_string()),
            Some(&dest.id.to_string()),
        )?;
    } else {
        // Always rewrite 0..n so a column with drifted orders is repaired.
        let current = db::column_ids(conn, dest.id)?;
        let reordered = place(current.clone(), issue.id, to_order);
        write_column(conn, dest.id, &reordered)?;
        if reordered != current {
            touch(conn, issue.id)?;
        }
    }

    let moved = fetch(conn, issue.id)?;
    tracing::info!(
        issue_id = moved.id,
        from_status_id,
        to_status_id = moved.status_id,
        status_order = moved.status_order,
        "Issue moved"
    );
    Ok(MoveOutcome {
        from_status_id,
        to_status_id: moved.status_id,
        issue: moved,
    })
}

// ── Soft delete ───────────────────────────────────────────────────────

/// Soft-delete an issue and close the gap it leaves in its column.
pub fn soft_delete_issue(conn: &Connection, issue_id: i64, user_id: i64) -> BoardResult<Issue> {
    let IssueAccess { issue, member, .. } = access::issue_access(conn, issue_id, user_id)?;
    access::require(member.role, Capability::DeleteIssue)?;

    conn.execute(
        "UPDATE issues SET deleted_at = datetime('now'), updated_at = datetime('now') WHERE id = ?1",
        params![issue.id],
    )?;
    let remaining = db::column_ids(conn, issue.status_id)?;
    write_column(conn, issue.status_id, &remaining)?;

    tracing::info!(issue_id = issue.id, status_id = issue.status_id, "Issue deleted");
    Ok(issue.into_inner())
}

// ── History ───────────────────────────────────────────────────────────

/// Append one history row when the value changed. Returns whether a row
/// was written.
pub fn record_history(
    conn: &Connection,
    issue_id: i64,
    actor_id: i64,
    field: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
) -> BoardResult<bool> {
    if old_value == new_value {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO issue_histories (issue_id, actor_id, field, old_value, new_value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![issue_id, actor_id, field, old_value, new_value],
    )?;
    Ok(true)
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Lenient due-date parsing: RFC 3339, `YYYY-MM-DD`, or a naive date-time
/// (taken as UTC). Anything else, including blank input, is no date.
pub fn parse_optional_date(input: Option<&str>) -> Option<String> {
    let raw = input?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.with_timezone(&Utc)
    } else if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?
            .and_utc()
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// All labels must exist in the project, with at most five per issue.
pub fn validate_labels(conn: &Connection, project_id: i64, labels: &[i64]) -> BoardResult<()> {
    if labels.len() > LABELS_PER_ISSUE_LIMIT {
        return Err(BoardError::InvalidLabels);
    }
    if labels.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "SELECT COUNT(*) FROM project_labels WHERE project_id = ? AND id IN ({})",
        db::placeholders(labels.len())
    );
    let found: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(std::iter::once(&project_id).chain(labels)),
        |row| row.get(0),
    )?;
    // Duplicates in the input also fail here.
    if found != labels.len() as i64 {
        return Err(BoardError::InvalidLabels);
    }
    Ok(())
}

pub fn validate_assignee(conn: &Connection, team_id: i64, assignee_id: Option<i64>) -> BoardResult<()> {
    match assignee_id {
        Some(user_id) if db::active_membership(conn, team_id, user_id)?.is_none() => {
            Err(BoardError::InvalidAssignee)
        }
        _ => Ok(()),
    }
}

fn ensure_wip_capacity(conn: &Connection, dest: &Status) -> BoardResult<()> {
    if dest.wip_limit > 0 && db::count_in_status(conn, dest.id)? >= dest.wip_limit {
        tracing::debug!(status_id = dest.id, limit = dest.wip_limit, "WIP limit reached");
        return Err(BoardError::WipLimitReached {
            status_id: dest.id,
            limit: dest.wip_limit,
        });
    }
    Ok(())
}

/// Insert `id` into `ids` at `to_order`, clamped into `0..=len`. Any prior
/// occurrence of `id` is removed first.
pub fn place(ids: Vec<i64>, id: i64, to_order: i64) -> Vec<i64> {
    let mut ids = without(ids, id);
    let at = usize::try_from(to_order.max(0))
        .unwrap_or(usize::MAX)
        .min(ids.len());
    ids.insert(at, id);
    ids
}

fn without(mut ids: Vec<i64>, id: i64) -> Vec<i64> {
    ids.retain(|other| *other != id);
    ids
}

/// Put every issue in `ids` into `status_id` with `status_order` equal to
/// its index.
fn write_column(conn: &Connection, status_id: i64, ids: &[i64]) -> BoardResult<()> {
    let mut stmt =
        conn.prepare_cached("UPDATE issues SET status_id = ?1, status_order = ?2 WHERE id = ?3")?;
    for (order, id) in ids.iter().enumerate() {
        stmt.execute(params![status_id, order as i64, id])?;
    }
    Ok(())
}

fn replace_labels(conn: &Connection, issue_id: i64, labels: &[i64]) -> BoardResult<()> {
    conn.execute("DELETE FROM issue_labels WHERE issue_id = ?1", params![issue_id])?;
    let mut stmt =
        conn.prepare_cached("INSERT INTO issue_labels (issue_id, label_id) VALUES (?1, ?2)")?;
    for label_id in labels {
        stmt.execute(params![issue_id, label_id])?;
    }
    Ok(())
}

/// `column` is always one of the fixed names used by `update_issue`.
fn set_field(conn: &Connection, issue_id: i64, column: &str, value: &dyn ToSql) -> BoardResult<()> {
    let sql = format!("UPDATE issues SET {column} = ?1, updated_at = datetime('now') WHERE id = ?2");
    conn.execute(&sql, params![value, issue_id])?;
    Ok(())
}

fn touch(conn: &Connection, issue_id: i64) -> BoardResult<()> {
    conn.execute(
        "UPDATE issues SET updated_at = datetime('now') WHERE id = ?1",
        params![issue_id],
    )?;
    Ok(())
}

fn fetch(conn: &Connection, issue_id: i64) -> BoardResult<Issue> {
    db::active_issue(conn, issue_id)?
        .map(|issue| issue.into_inner())
        .ok_or(BoardError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::fixtures::Fixture;

    fn history_count(f: &Fixture, issue_id: i64) -> i64 {
        f.conn()
            .query_row(
                "SELECT COUNT(*) FROM issue_histories WHERE issue_id = ?1",
                params![issue_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_create_issue_appends_to_backlog() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        assert_eq!(a.status_id, f.backlog);
        assert_eq!(a.status_order, 0);
        assert_eq!(b.status_order, 1);
        assert_eq!(a.priority, Priority::Medium);
        assert_eq!(a.owner_id, f.owner);
        Ok(())
    }

    #[test]
    fn test_create_issue_requires_membership_and_role() {
        let f = Fixture::new();
        let input = || NewIssue {
            title: "x".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_issue(f.conn(), f.project_id, f.outsider, input()),
            Err(BoardError::NotFound)
        ));
        assert!(matches!(
            create_issue(f.conn(), f.project_id, f.member, input()),
            Err(BoardError::Forbidden)
        ));
        assert!(create_issue(f.conn(), f.project_id, f.admin, input()).is_ok());
        assert!(matches!(
            create_issue(f.conn(), 9999, f.owner, input()),
            Err(BoardError::NotFound)
        ));
    }

    #[test]
    fn test_create_issue_with_labels_assignee_and_due_date() -> anyhow::Result<()> {
        let f = Fixture::new();
        let bug = f.label("bug");
        let issue = create_issue(
            f.conn(),
            f.project_id,
            f.owner,
            NewIssue {
                title: "Crash".into(),
                assignee_id: Some(f.member),
                due_date: Some("2030-05-01".into()),
                priority: Some(Priority::High),
                labels: vec![bug.id],
                ..Default::default()
            },
        )?;
        assert_eq!(issue.assignee_id, Some(f.member));
        assert_eq!(issue.due_date.as_deref(), Some("2030-05-01T00:00:00.000Z"));
        assert_eq!(issue.priority, Priority::High);
        assert_eq!(db::labels_for_issue(f.conn(), issue.id)?, vec![bug]);
        Ok(())
    }

    #[test]
    fn test_create_issue_rejects_foreign_label_without_writes() -> anyhow::Result<()> {
        let f = Fixture::new();
        let foreign = f.label_in(f.second_project(), "elsewhere");
        let result = f.db.unit_of_work(|tx| {
            create_issue(
                tx,
                f.project_id,
                f.owner,
                NewIssue {
                    title: "x".into(),
                    labels: vec![foreign.id],
                    ..Default::default()
                },
            )
        });
        assert!(matches!(result, Err(BoardError::InvalidLabels)));
        assert_eq!(db::count_active_issues(f.conn(), f.project_id)?, 0);
        Ok(())
    }

    #[test]
    fn test_create_issue_rejects_too_many_or_duplicate_labels() {
        let f = Fixture::new();
        let labels: Vec<i64> = (0..6).map(|n| f.label(&format!("l{n}")).id).collect();
        let too_many = NewIssue {
            title: "x".into(),
            labels: labels.clone(),
            ..Default::default()
        };
        assert!(matches!(
            create_issue(f.conn(), f.project_id, f.owner, too_many),
            Err(BoardError::InvalidLabels)
        ));
        let dup = NewIssue {
            title: "x".into(),
            labels: vec![labels[0], labels[0]],
            ..Default::default()
        };
        assert!(matches!(
            create_issue(f.conn(), f.project_id, f.owner, dup),
            Err(BoardError::InvalidLabels)
        ));
    }

    #[test]
    fn test_create_issue_rejects_non_member_assignee() {
        let f = Fixture::new();
        let input = NewIssue {
            title: "x".into(),
            assignee_id: Some(f.outsider),
            ..Default::default()
        };
        assert!(matches!(
            create_issue(f.conn(), f.project_id, f.owner, input),
            Err(BoardError::InvalidAssignee)
        ));
    }

    #[test]
    fn test_create_issue_without_backlog_is_internal_error() -> anyhow::Result<()> {
        let f = Fixture::new();
        f.conn().execute(
            "UPDATE statuses SET deleted_at = datetime('now') WHERE kind = 'BACKLOG'",
            [],
        )?;
        let err = create_issue(
            f.conn(),
            f.project_id,
            f.owner,
            NewIssue {
                title: "x".into(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, BoardError::MissingDefaultStatus { .. }));
        assert!(err.is_internal());
        Ok(())
    }

    #[test]
    fn test_issue_limit() -> anyhow::Result<()> {
        let f = Fixture::new();
        for n in 0..ISSUE_LIMIT {
            f.issue(&format!("issue {n}"));
        }
        let result = f.db.unit_of_work(|tx| {
            create_issue(
                tx,
                f.project_id,
                f.owner,
                NewIssue {
                    title: "one too many".into(),
                    ..Default::default()
                },
            )
        });
        assert!(matches!(result, Err(BoardError::IssueLimit { limit: 200 })));
        assert_eq!(db::count_active_issues(f.conn(), f.project_id)?, ISSUE_LIMIT);
        Ok(())
    }

    #[test]
    fn test_reorder_within_column() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        let c = f.issue("C");

        let outcome = move_issue(f.conn(), b.id, f.owner, f.backlog, 0)?;
        assert_eq!(outcome.issue.status_order, 0);
        assert_eq!(f.column(f.backlog), vec![b.id, a.id, c.id]);
        assert_eq!(f.orders(f.backlog), vec![0, 1, 2]);
        assert_eq!(history_count(&f, b.id), 0, "reorder records no history");
        Ok(())
    }

    #[test]
    fn test_move_across_columns_renumbers_both() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        let c = f.issue("C");
        move_issue(f.conn(), c.id, f.owner, f.in_progress, 0)?;

        let outcome = move_issue(f.conn(), a.id, f.owner, f.in_progress, 0)?;
        assert_eq!(outcome.from_status_id, f.backlog);
        assert_eq!(outcome.to_status_id, f.in_progress);
        assert_eq!(f.column(f.backlog), vec![b.id]);
        assert_eq!(f.orders(f.backlog), vec![0]);
        assert_eq!(f.column(f.in_progress), vec![a.id, c.id]);
        assert_eq!(f.orders(f.in_progress), vec![0, 1]);

        let histories = db::histories_for_issue(f.conn(), a.id, 50)?;
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].field, "status");
        assert_eq!(histories[0].old_value, Some(f.backlog.to_string()));
        assert_eq!(histories[0].new_value, Some(f.in_progress.to_string()));
        Ok(())
    }

    #[test]
    fn test_move_clamps_target_index() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        move_issue(f.conn(), a.id, f.owner, f.backlog, 99)?;
        assert_eq!(f.column(f.backlog), vec![b.id, a.id]);
        move_issue(f.conn(), a.id, f.owner, f.backlog, -4)?;
        assert_eq!(f.column(f.backlog), vec![a.id, b.id]);
        Ok(())
    }

    #[test]
    fn test_noop_move_is_idempotent() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        let before = f.column(f.backlog);
        move_issue(f.conn(), b.id, f.owner, f.backlog, 1)?;
        move_issue(f.conn(), b.id, f.owner, f.backlog, 1)?;
        assert_eq!(f.column(f.backlog), before);
        assert_eq!(f.column(f.backlog), vec![a.id, b.id]);
        Ok(())
    }

    #[test]
    fn test_same_column_move_repairs_gapped_orders() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        let c = f.issue("C");
        for (id, order) in [(a.id, 0), (b.id, 5), (c.id, 9)] {
            f.conn().execute(
                "UPDATE issues SET status_order = ?1 WHERE id = ?2",
                params![order, id],
            )?;
        }

        move_issue(f.conn(), b.id, f.owner, f.backlog, 1)?;
        assert_eq!(f.column(f.backlog), vec![a.id, b.id, c.id]);
        assert_eq!(f.orders(f.backlog), vec![0, 1, 2]);
        assert!(db::histories_for_issue(f.conn(), b.id, 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_wip_limit_blocks_entering_column_and_leaves_order() -> anyhow::Result<()> {
        let f = Fixture::new();
        let x = f.issue("X");
        let y = f.issue("Y");
        move_issue(f.conn(), x.id, f.owner, f.in_progress, 0)?;
        f.set_wip(f.in_progress, 1);

        let result = f
            .db
            .unit_of_work(|tx| move_issue(tx, y.id, f.owner, f.in_progress, 0));
        assert!(matches!(
            result,
            Err(BoardError::WipLimitReached { limit: 1, .. })
        ));
        assert_eq!(f.column(f.in_progress), vec![x.id]);
        assert_eq!(f.orders(f.in_progress), vec![0]);
        assert_eq!(f.column(f.backlog), vec![y.id]);
        assert_eq!(f.orders(f.backlog), vec![0]);
        Ok(())
    }

    #[test]
    fn test_wip_limit_does_not_block_reorder_inside_full_column() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        f.set_wip(f.backlog, 2);
        move_issue(f.conn(), b.id, f.owner, f.backlog, 0)?;
        assert_eq!(f.column(f.backlog), vec![b.id, a.id]);
        Ok(())
    }

    #[test]
    fn test_move_rejects_status_of_other_project() {
        let f = Fixture::new();
        let a = f.issue("A");
        let other_backlog = db::backlog_status(f.conn(), f.second_project())
            .unwrap()
            .unwrap()
            .id;
        assert!(matches!(
            move_issue(f.conn(), a.id, f.owner, other_backlog, 0),
            Err(BoardError::InvalidStatus)
        ));
    }

    #[test]
    fn test_move_requires_edit_rights() {
        let f = Fixture::new();
        let a = f.issue("A");
        assert!(matches!(
            move_issue(f.conn(), a.id, f.member, f.in_progress, 0),
            Err(BoardError::Forbidden)
        ));
        assert!(matches!(
            move_issue(f.conn(), a.id, f.outsider, f.in_progress, 0),
            Err(BoardError::NotFound)
        ));
    }

    #[test]
    fn test_update_fields_write_history_only_on_change() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");

        update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                title: Some("A".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(history_count(&f, a.id), 0);

        let updated = update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                title: Some("Renamed".into()),
                priority: Some(Priority::Low),
                description: Some(Some("details".into())),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.issue.title, "Renamed");
        assert_eq!(updated.issue.priority, Priority::Low);
        assert_eq!(updated.issue.description.as_deref(), Some("details"));
        assert_eq!(history_count(&f, a.id), 3);

        let fields: Vec<String> = db::histories_for_issue(f.conn(), a.id, 50)?
            .into_iter()
            .map(|h| h.field)
            .collect();
        assert!(fields.contains(&"title".to_string()));
        assert!(fields.contains(&"priority".to_string()));
        assert!(fields.contains(&"description".to_string()));
        Ok(())
    }

    #[test]
    fn test_update_due_date_and_assignee_can_be_cleared() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                due_date: Some(Some("2031-01-02T10:00:00Z".into())),
                assignee_id: Some(Some(f.admin)),
                ..Default::default()
            },
        )?;
        let cleared = update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                due_date: Some(None),
                assignee_id: Some(None),
                ..Default::default()
            },
        )?;
        assert_eq!(cleared.issue.due_date, None);
        assert_eq!(cleared.issue.assignee_id, None);
        // set + clear for both fields
        assert_eq!(history_count(&f, a.id), 4);
        Ok(())
    }

    #[test]
    fn test_update_status_appends_and_closes_origin_gap() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        let c = f.issue("C");
        let d = f.issue("D");
        move_issue(f.conn(), d.id, f.owner, f.in_progress, 0)?;

        let updated = update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                status_id: Some(f.in_progress),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.status.id, f.in_progress);
        assert_eq!(updated.issue.status_order, 1);
        assert_eq!(f.column(f.in_progress), vec![d.id, a.id]);
        assert_eq!(f.column(f.backlog), vec![b.id, c.id]);
        assert_eq!(f.orders(f.backlog), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_update_status_respects_wip_and_rolls_back() -> anyhow::Result<()> {
        let f = Fixture::new();
        let x = f.issue("X");
        let y = f.issue("Y");
        move_issue(f.conn(), x.id, f.owner, f.in_progress, 0)?;
        f.set_wip(f.in_progress, 1);

        let result = f.db.unit_of_work(|tx| {
            update_issue(
                tx,
                y.id,
                f.owner,
                IssueUpdate {
                    title: Some("changed".into()),
                    status_id: Some(f.in_progress),
                    ..Default::default()
                },
            )
        });
        assert!(matches!(result, Err(BoardError::WipLimitReached { .. })));
        let y_now = db::active_issue(f.conn(), y.id)?.unwrap();
        assert_eq!(y_now.title, "Y");
        assert_eq!(y_now.status_id, f.backlog);
        Ok(())
    }

    #[test]
    fn test_update_replaces_labels() -> anyhow::Result<()> {
        let f = Fixture::new();
        let bug = f.label("bug");
        let ui = f.label("ui");
        let a = f.issue("A");
        update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                labels: Some(vec![bug.id]),
                ..Default::default()
            },
        )?;
        let updated = update_issue(
            f.conn(),
            a.id,
            f.owner,
            IssueUpdate {
                labels: Some(vec![ui.id]),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.labels, vec![ui]);
        Ok(())
    }

    #[test]
    fn test_update_deleted_issue_is_not_found() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        soft_delete_issue(f.conn(), a.id, f.owner)?;
        assert!(matches!(
            update_issue(f.conn(), a.id, f.owner, IssueUpdate::default()),
            Err(BoardError::NotFound)
        ));
        Ok(())
    }

    #[test]
    fn test_soft_delete_renumbers_column() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        let b = f.issue("B");
        let c = f.issue("C");
        soft_delete_issue(f.conn(), b.id, f.admin)?;
        assert_eq!(f.column(f.backlog), vec![a.id, c.id]);
        assert_eq!(f.orders(f.backlog), vec![0, 1]);
        assert!(matches!(
            soft_delete_issue(f.conn(), a.id, f.member),
            Err(BoardError::Forbidden)
        ));
        Ok(())
    }

    #[test]
    fn test_parse_optional_date_is_lenient() {
        assert_eq!(parse_optional_date(None), None);
        assert_eq!(parse_optional_date(Some("  ")), None);
        assert_eq!(parse_optional_date(Some("next tuesday")), None);
        assert_eq!(
            parse_optional_date(Some("2030-01-31")).as_deref(),
            Some("2030-01-31T00:00:00.000Z")
        );
        assert_eq!(
            parse_optional_date(Some("2030-01-31T12:30:00+02:00")).as_deref(),
            Some("2030-01-31T10:30:00.000Z")
        );
        assert_eq!(
            parse_optional_date(Some("2030-01-31T12:30")).as_deref(),
            Some("2030-01-31T12:30:00.000Z")
        );
    }

    #[test]
    fn test_place_clamps_and_dedupes() {
        assert_eq!(place(vec![1, 2, 3], 4, 0), vec![4, 1, 2, 3]);
        assert_eq!(place(vec![1, 2, 3], 4, 10), vec![1, 2, 3, 4]);
        assert_eq!(place(vec![1, 2, 3], 2, 0), vec![2, 1, 3]);
        assert_eq!(place(vec![1, 2, 3], 1, -1), vec![1, 2, 3]);
        assert_eq!(place(Vec::new(), 9, 3), vec![9]);
    }

    #[test]
    fn test_record_history_skips_equal_values() -> anyhow::Result<()> {
        let f = Fixture::new();
        let a = f.issue("A");
        assert!(!record_history(f.conn(), a.id, f.owner, "title", Some("x"), Some("x"))?);
        assert!(!record_history(f.conn(), a.id, f.owner, "assignee", None, None)?);
        assert!(record_history(f.conn(), a.id, f.owner, "assignee", None, Some("3"))?);
        assert_eq!(history_count(&f, a.id), 1);
        Ok(())
    }
}

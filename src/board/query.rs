//! Read models: board view, issue detail and the filtered issue search.

use rusqlite::Connection;
use rusqlite::types::Value;

use super::access;
use super::db;
use super::issues::parse_optional_date;
use super::models::*;
use super::validation;
use crate::errors::{BoardError, BoardResult};

pub const DETAIL_HISTORY_LIMIT: i64 = 50;

/// Statuses by position, each with its active issues in board order.
pub fn get_board(conn: &Connection, project_id: i64, user_id: i64) -> BoardResult<BoardView> {
    let access = access::project_access(conn, project_id, user_id)?;

    let mut columns = Vec::new();
    for status in db::statuses_for_project(conn, project_id)? {
        let mut issues = Vec::new();
        for issue in db::issues_in_status(conn, status.id)? {
            let labels = db::labels_for_issue(conn, issue.id)?;
            issues.push(IssueCard { issue, labels });
        }
        columns.push(ColumnView { status, issues });
    }

    Ok(BoardView {
        project: access.project.into_inner(),
        columns,
    })
}

pub fn issue_detail(conn: &Connection, issue_id: i64, user_id: i64) -> BoardResult<IssueDetail> {
    let access = access::issue_access(conn, issue_id, user_id)?;
    let issue = issue_with_relations(conn, access.issue.into_inner())?;
    let histories = db::histories_for_issue(conn, issue_id, DETAIL_HISTORY_LIMIT)?;
    Ok(IssueDetail { issue, histories })
}

pub fn issue_with_relations(conn: &Connection, issue: Issue) -> BoardResult<IssueWithRelations> {
    let status = db::active_status(conn, issue.status_id, issue.project_id)?
        .ok_or(BoardError::NotFound)?
        .into_inner();
    let labels = db::labels_for_issue(conn, issue.id)?;
    let subtasks = db::subtasks_for_issue(conn, issue.id)?;
    Ok(IssueWithRelations {
        issue,
        status,
        labels,
        subtasks,
    })
}

/// Filtered, sorted, paginated issues of one project.
pub fn search_issues(conn: &Connection, user_id: i64, query: &IssueQuery) -> BoardResult<Page<IssueWithRelations>> {
    let access = access::project_access(conn, query.project_id, user_id)?;
    let window = validation::pagination(query.page, query.page_size)?;

    let (where_sql, mut values) = filter_clause(access.project.id, query);
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM issues i WHERE {where_sql}"),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM issues i WHERE {where_sql} ORDER BY {} LIMIT ? OFFSET ?",
        db::issue_columns(),
        order_clause(query.sort, query.order),
    );
    values.push(Value::Integer(window.page_size));
    values.push(Value::Integer(window.offset));
    tracing::debug!(project_id = query.project_id, %sql, "Issue search");

    let mut items = Vec::new();
    for issue in db::query_issues(conn, &sql, rusqlite::params_from_iter(values.iter()))? {
        items.push(issue_with_relations(conn, issue)?);
    }

    Ok(Page {
        items,
        page: window.page,
        page_size: window.page_size,
        total,
    })
}

fn filter_clause(project_id: i64, query: &IssueQuery) -> (String, Vec<Value>) {
    let mut clauses = vec!["i.project_id = ?".to_string(), "i.deleted_at IS NULL".to_string()];
    let mut values = vec![Value::Integer(project_id)];

    if !query.status_ids.is_empty() {
        clauses.push(format!(
            "i.status_id IN ({})",
            db::placeholders(query.status_ids.len())
        ));
        values.extend(query.status_ids.iter().map(|id| Value::Integer(*id)));
    }
    if let Some(assignee) = query.assignee_id {
        clauses.push("i.assignee_id = ?".into());
        values.push(Value::Integer(assignee));
    }
    if let Some(priority) = query.priority {
        clauses.push("i.priority = ?".into());
        values.push(Value::Text(priority.as_str().into()));
    }
    if !query.label_ids.is_empty() {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM issue_labels il WHERE il.issue_id = i.id AND il.label_id IN ({}))",
            db::placeholders(query.label_ids.len())
        ));
        values.extend(query.label_ids.iter().map(|id| Value::Integer(*id)));
    }
    if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        clauses.push("instr(lower(i.title), ?) > 0".into());
        values.push(Value::Text(term.to_lowercase()));
    }
    match query.has_due {
        Some(true) => clauses.push("i.due_date IS NOT NULL".into()),
        Some(false) => clauses.push("i.due_date IS NULL".into()),
        None => {}
    }
    if let Some(from) = parse_optional_date(query.due_from.as_deref()) {
        clauses.push("i.due_date >= ?".into());
        values.push(Value::Text(from));
    }
    if let Some(to) = parse_optional_date(query.due_to.as_deref()) {
        clauses.push("i.due_date <= ?".into());
        values.push(Value::Text(to));
    }

    (clauses.join(" AND "), values)
}

fn order_clause(sort: IssueSort, order: SortOrder) -> String {
    let dir = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let key = match sort {
        IssueSort::CreatedAt => "i.created_at",
        IssueSort::UpdatedAt => "i.updated_at",
        IssueSort::DueDate => "i.due_date",
        IssueSort::Priority => "CASE i.priority WHEN 'HIGH' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END",
    };
    format!("{key} {dir}, i.id {dir}")
}

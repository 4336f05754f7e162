//! Shared test setup: one team with an owner, an admin and a member, plus an
//! unrelated outsider, and two projects with default statuses.

use rusqlite::{Connection, params};

use super::db::{self, BoardDb};
use super::issues::create_issue;
use super::labels::create_label;
use super::models::*;
use super::projects::create_project;
use super::session::create_user;
use super::teams::create_team;

pub(crate) struct Fixture {
    pub db: BoardDb,
    pub owner: i64,
    pub admin: i64,
    pub member: i64,
    pub outsider: i64,
    pub team_id: i64,
    pub project_id: i64,
    pub backlog: i64,
    pub in_progress: i64,
    pub done: i64,
    second_project_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let db = BoardDb::new_in_memory().expect("in-memory db");
        let conn = db.conn();
        let user = |email: &str| create_user(conn, email, None).expect("user").id;
        let owner = user("owner@example.com");
        let admin = user("admin@example.com");
        let member = user("member@example.com");
        let outsider = user("outsider@example.com");

        let team_id = create_team(conn, owner, "Core").expect("team").id;
        for (user_id, role) in [(admin, TeamRole::Admin), (member, TeamRole::Member)] {
            conn.execute(
                "INSERT INTO team_members (team_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![team_id, user_id, role.as_str()],
            )
            .expect("membership");
        }

        let project = |name: &str| {
            create_project(
                conn,
                owner,
                NewProject {
                    team_id,
                    name: name.into(),
                    description: None,
                },
            )
            .expect("project")
            .id
        };
        let project_id = project("Board");
        let second_project_id = project("Other");

        let statuses = db::statuses_for_project(conn, project_id).expect("statuses");
        let (backlog, in_progress, done) = (statuses[0].id, statuses[1].id, statuses[2].id);

        Self {
            db,
            owner,
            admin,
            member,
            outsider,
            team_id,
            project_id,
            backlog,
            in_progress,
            done,
            second_project_id,
        }
    }

    pub fn conn(&self) -> &Connection {
        self.db.conn()
    }

    pub fn second_project(&self) -> i64 {
        self.second_project_id
    }

    pub fn issue(&self, title: &str) -> Issue {
        create_issue(
            self.conn(),
            self.project_id,
            self.owner,
            NewIssue {
                title: title.into(),
                ..Default::default()
            },
        )
        .expect("issue")
    }

    pub fn label(&self, name: &str) -> Label {
        self.label_in(self.project_id, name)
    }

    pub fn label_in(&self, project_id: i64, name: &str) -> Label {
        create_label(self.conn(), project_id, self.owner, name, "#123456").expect("label")
    }

    pub fn set_wip(&self, status_id: i64, limit: i64) {
        self.conn()
            .execute(
                "UPDATE statuses SET wip_limit = ?1 WHERE id = ?2",
                params![limit, status_id],
            )
            .expect("wip limit");
    }

    /// Issue ids of a column in board order.
    pub fn column(&self, status_id: i64) -> Vec<i64> {
        db::column_ids(self.conn(), status_id).expect("column")
    }

    pub fn orders(&self, status_id: i64) -> Vec<i64> {
        db::issues_in_status(self.conn(), status_id)
            .expect("column")
            .iter()
            .map(|i| i.status_order)
            .collect()
    }
}

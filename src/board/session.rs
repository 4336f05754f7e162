//! Session resolution and identity provisioning.
//!
//! Users and sessions are written by the identity provider; this service only
//! resolves a token to a `SessionUser`. `create_user` / `issue_session` exist
//! for operators (the `user add` / `session issue` CLI commands) and tests.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::api::{ApiError, SharedState};
use super::db::{self, DbHandle, sql_timestamp};
use super::models::User;
use crate::errors::{BoardError, BoardResult};

/// Cookie names the identity provider may use, checked in order.
pub const SESSION_COOKIE_NAMES: [&str; 4] = [
    "__Secure-authjs.session-token",
    "authjs.session-token",
    "__Secure-next-auth.session-token",
    "next-auth.session-token",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

/// Turns a session token into the signed-in user.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> BoardResult<Option<SessionUser>>;
}

/// Resolves against the `sessions` / `users` tables.
pub struct SqliteSessionResolver {
    db: DbHandle,
}

impl SqliteSessionResolver {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionResolver for SqliteSessionResolver {
    async fn resolve(&self, token: &str) -> BoardResult<Option<SessionUser>> {
        let token = token.to_string();
        self.db.read(move |conn| resolve_session(conn, &token)).await
    }
}

/// Look up a live session. Expired sessions and sessions of deleted users
/// are removed on sight.
pub fn resolve_session(conn: &Connection, token: &str) -> BoardResult<Option<SessionUser>> {
    let row = conn
        .query_row(
            "SELECT u.id, u.email, u.name,
                    s.expires_at > datetime('now') AS live,
                    u.deleted_at IS NULL AS active
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            params![token],
            |row| {
                Ok((
                    SessionUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                    },
                    row.get::<_, bool>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((user, true, true)) => Ok(Some(user)),
        Some((user, _, _)) => {
            conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
            tracing::debug!(user_id = user.id, "Dropped stale session");
            Ok(None)
        }
        None => Ok(None),
    }
}

pub fn create_user(conn: &Connection, email: &str, name: Option<&str>) -> BoardResult<User> {
    conn.execute(
        "INSERT INTO users (email, name) VALUES (?1, ?2)",
        params![email, name],
    )?;
    let id = conn.last_insert_rowid();
    db::active_user(conn, id)?
        .map(|u| u.into_inner())
        .ok_or(BoardError::NotFound)
}

/// Write a session row valid for `ttl_days` and return its token.
pub fn issue_session(conn: &Connection, user_id: i64, ttl_days: i64) -> BoardResult<String> {
    let token = Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, sql_timestamp(Utc::now() + Duration::days(ttl_days))],
    )?;
    Ok(token)
}

/// The session token from a known cookie, else from `Authorization: Bearer`.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies: Vec<(&str, &str)> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .collect();
    for name in SESSION_COOKIE_NAMES {
        if let Some((_, value)) = cookies.iter().find(|(k, v)| *k == name && !v.is_empty()) {
            return Some(value.to_string());
        }
    }

    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Extractor for handlers that need a signed-in user. Rejects with 401.
pub struct CurrentUser(pub SessionUser);

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or(ApiError::Unauthorized)?;
        match state.sessions.resolve(&token).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(ApiError::Unauthorized),
        }
    }
}

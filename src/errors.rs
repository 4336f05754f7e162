//! Typed error hierarchy for the board engine and team workspace.
//!
//! `BoardError` is returned by every engine operation. The HTTP layer maps it
//! onto status codes in `board::api::ApiError`; anything raised inside a unit
//! of work rolls the surrounding transaction back.

use thiserror::Error;

pub type BoardResult<T> = Result<T, BoardError>;

#[derive(Debug, Error)]
pub enum BoardError {
    /// Missing, soft-deleted, or not reachable through an active membership.
    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid status")]
    InvalidStatus,

    #[error("Invalid labels for this project")]
    InvalidLabels,

    #[error("Assignee must be an active member of the team")]
    InvalidAssignee,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Issue limit reached ({limit} per project)")]
    IssueLimit { limit: i64 },

    #[error("Label limit reached ({limit} per project)")]
    LabelLimit { limit: i64 },

    #[error("Subtask limit reached ({limit} per issue)")]
    SubtaskLimit { limit: i64 },

    #[error("Custom status limit reached ({limit} per project)")]
    StatusLimit { limit: i64 },

    #[error("Project limit reached ({limit} per team)")]
    ProjectLimit { limit: i64 },

    #[error("WIP limit reached for status {status_id} (limit {limit})")]
    WipLimitReached { status_id: i64, limit: i64 },

    #[error("Project {project_id} has no backlog status")]
    MissingDefaultStatus { project_id: i64 },

    #[error("Invite is invalid or has expired")]
    InviteInvalid,

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    /// True for failures the caller could not have caused (HTTP 5xx).
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::MissingDefaultStatus { .. } | Self::Database(_) | Self::LockPoisoned | Self::Other(_)
        )
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

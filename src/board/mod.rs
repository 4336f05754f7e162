//! Board engine and team workspace service.
//!
//! ## Overview
//!
//! Multi-tenant issue tracking: teams own projects, projects own status
//! columns, and issues move across those columns subject to WIP limits.
//! Within a column the active issues' `status_order` values are always
//! `0..n`; every mutation that touches a column rewrites it whole inside
//! one SQLite transaction.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    ├─ api.rs      (handlers, AppState, ApiError) │
//! └──────────┘ WebSocket│    ├─ ws.rs       (WsMessage, per-project feed)  │
//!                       │    └─ session.rs  (CurrentUser extractor)        │
//!                       │         │                                        │
//!                       │         │ DbHandle::write(unit of work)          │
//!                       │         v                                        │
//!                       │  issues.rs    (create / update / move / delete)  │
//!                       │  statuses.rs labels.rs subtasks.rs comments.rs   │
//!                       │  teams.rs projects.rs query.rs                   │
//!                       │         │                                        │
//!                       │         │ access::can(role, Capability)          │
//!                       │         v                                        │
//!                       │  db.rs  (schema, Active<T> fetchers)             │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `models`     | Records, views and request inputs                       |
//! | `active`     | `Active<T>`: a row read with `deleted_at IS NULL`       |
//! | `access`     | Role x capability matrix and membership resolution      |
//! | `validation` | Payload length / color / email / pagination checks      |
//! | `notify`     | `Notifier` trait, fire-and-forget invite delivery       |
//!
//! ## Typical Request Flow (move issue)
//!
//! 1. `POST /api/issues/{id}/move` → `api::move_issue()`
//! 2. `CurrentUser` resolves the session token through `SessionResolver`.
//! 3. `DbHandle::write` opens a transaction and calls `issues::move_issue`,
//!    which checks membership and role, enforces the destination's WIP
//!    limit, rewrites both columns and appends one history row.
//! 4. On commit the handler broadcasts `WsMessage::IssueMoved` to sockets
//!    subscribed to the project.

pub mod access;
pub mod active;
pub mod api;
pub mod comments;
pub mod db;
pub mod issues;
pub mod labels;
pub mod models;
pub mod notify;
pub mod projects;
pub mod query;
pub mod server;
pub mod session;
pub mod statuses;
pub mod subtasks;
pub mod teams;
pub mod validation;
pub mod ws;

#[cfg(test)]
mod fixtures;

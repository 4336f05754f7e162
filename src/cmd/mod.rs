//! CLI command implementations.
//!
//! | Module   | Commands handled                  |
//! |----------|-----------------------------------|
//! | `serve`  | `Serve`, `Init`                   |
//! | `config` | `Config`                          |
//! | `admin`  | `User add`, `Session issue`       |

pub mod admin;
pub mod config;
pub mod serve;

pub use admin::{cmd_session_issue, cmd_user_add};
pub use config::cmd_config;
pub use serve::{cmd_init, cmd_serve};

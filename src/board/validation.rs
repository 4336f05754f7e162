//! Request payload checks, applied at the HTTP boundary before any engine
//! call. Failures become `BoardError::InvalidInput` (HTTP 400).

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{BoardError, BoardResult};

pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 5000;
pub const COMMENT_MAX: usize = 2000;
pub const LABEL_NAME_MAX: usize = 40;
pub const STATUS_NAME_MAX: usize = 40;
pub const TEAM_NAME_MAX: usize = 50;
pub const PROJECT_NAME_MAX: usize = 100;
pub const PROJECT_DESCRIPTION_MAX: usize = 2000;
pub const WIP_LIMIT_MAX: i64 = 50;
pub const PAGE_SIZE_MAX: i64 = 100;

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#?[0-9A-Fa-f]{6}$").expect("hex color pattern compiles"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// Required text: trimmed length within `1..=max`. Returns the trimmed value.
pub fn required_text(field: &str, value: &str, max: usize) -> BoardResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::invalid(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(BoardError::invalid(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> BoardResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(BoardError::invalid(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

pub fn hex_color(value: &str) -> BoardResult<()> {
    if HEX_COLOR.is_match(value) {
        Ok(())
    } else {
        Err(BoardError::invalid(format!("invalid color: {value}")))
    }
}

/// `ABCDEF` and `#ABCDEF` are both accepted; storage always has the `#`.
pub fn normalize_color(value: &str) -> String {
    if value.starts_with('#') {
        value.to_string()
    } else {
        format!("#{value}")
    }
}

pub fn wip_limit(value: i64) -> BoardResult<()> {
    if (0..=WIP_LIMIT_MAX).contains(&value) {
        Ok(())
    } else {
        Err(BoardError::invalid(format!(
            "wip_limit must be between 0 and {WIP_LIMIT_MAX}"
        )))
    }
}

pub fn email(value: &str) -> BoardResult<String> {
    let trimmed = value.trim();
    if EMAIL.is_match(trimmed) {
        Ok(trimmed.to_lowercase())
    } else {
        Err(BoardError::invalid(format!("invalid email: {value}")))
    }
}

/// A validated page request with its row offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
    pub offset: i64,
}

/// Page numbers start at 1; page size is capped and the offset must fit.
pub fn pagination(page: i64, page_size: i64) -> BoardResult<PageWindow> {
    if page < 1 {
        return Err(BoardError::invalid("page must be at least 1"));
    }
    if !(1..=PAGE_SIZE_MAX).contains(&page_size) {
        return Err(BoardError::invalid(format!(
            "page_size must be between 1 and {PAGE_SIZE_MAX}"
        )));
    }
    let offset = (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| BoardError::invalid("page is out of range"))?;
    Ok(PageWindow {
        page,
        page_size,
        offset,
    })
}

pub fn non_negative(field: &str, value: i64) -> BoardResult<()> {
    if value < 0 {
        Err(BoardError::invalid(format!("{field} must not be negative")))
    } else {
        Ok(())
    }
}

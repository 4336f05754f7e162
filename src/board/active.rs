use std::ops::Deref;

/// A row known to be live: it was read with `deleted_at IS NULL` (and, for
/// team-scoped rows, with a live team).
///
/// Only the fetchers in `board::db` can build one, so a function taking
/// `Active<Issue>` cannot be handed a soft-deleted issue.
#[derive(Debug, Clone)]
pub struct Active<T>(T);

impl<T> Active<T> {
    pub(super) fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Active<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

use serde::Deserialize;

use crate::db::models::page_bounds;

pub mod auth;
pub mod external_systems;
pub mod health;
pub mod items;
pub mod metrics;
pub mod prometheus;
pub mod tasks;
pub mod third_party;
pub mod users;

/// Largest page any list endpoint returns.
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    /// `(offset, limit)` with `limit` clamped to `1..=MAX_PAGE_SIZE`.
    pub fn bounds(&self) -> (i64, i64) {
        page_bounds(self.skip, self.limit, MAX_PAGE_SIZE)
    }
}

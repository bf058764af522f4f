//! Listing filters and pagination envelopes for the notification admin
//! surface.

use chrono::{DateTime, Utc};
use dentiq_core::types::{ChannelKind, JobStatus, NotificationKind};
use serde::{Deserialize, Serialize};

/// Filter for `JobStore::list`. All fields are AND-combined; a `None`
/// field matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<NotificationKind>,
    pub channel: Option<ChannelKind>,
    pub patient_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
}

/// Sortable columns. A closed set so user input can never reach SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    CreatedAt,
    UpdatedAt,
    NextAttemptAt,
    Status,
}

impl SortBy {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::UpdatedAt => "updated_at",
            SortBy::NextAttemptAt => "next_attempt_at",
            SortBy::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Page request; defaults to page 1, 20 rows, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default = "default_sort_by")]
    pub sort_by: SortBy,
    #[serde(default = "default_sort_order")]
    pub sort_order: SortOrder,
}

fn default_page() -> u64 { 1 }
fn default_limit() -> u64 { 20 }
fn default_sort_by() -> SortBy { SortBy::CreatedAt }
fn default_sort_order() -> SortOrder { SortOrder::Desc }

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            sort_by: default_sort_by(),
            sort_order: default_sort_order(),
        }
    }
}

impl PageRequest {
    /// Clamp nonsense input: page >= 1, 1 <= limit <= 200.
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, 200),
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }
}

/// One page of results plus the pagination envelope the admin UI expects.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if total == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1 && total_pages > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_envelope() {
        let p = Pagination::new(2, 10, 35);
        assert_eq!(p.total_pages, 4);
        assert!(p.has_next);
        assert!(p.has_prev);

        let p = Pagination::new(4, 10, 35);
        assert!(!p.has_next);

        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
        assert!(!p.has_prev);
    }

    #[test]
    fn test_page_request_normalized() {
        let req = PageRequest { page: 0, limit: 100_000, ..Default::default() };
        let norm = req.normalized();
        assert_eq!(norm.page, 1);
        assert_eq!(norm.limit, 200);
        assert_eq!(norm.offset(), 0);
    }
}

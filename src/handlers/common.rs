use serde::Deserialize;
use utoipa::IntoParams;

use crate::{config::AppConfig, PaginatedResponse};

/// Pagination parameters for list operations
#[derive(Debug, Default, Clone, Copy, Deserialize, IntoParams)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size, clamped to the configured maximum
    pub limit: Option<u64>,
}

impl PaginationParams {
    /// Resolves `(page, limit)` against the configured bounds.
    pub fn resolve(&self, config: &AppConfig) -> (u64, u64) {
        (self.page.unwrap_or(1).max(1), config.page_size(self.limit))
    }
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

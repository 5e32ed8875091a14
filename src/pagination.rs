//! This module defines the common functionality for paging data.

/// The config for pagination
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// The page number to default to when not specified in a request.
    pub default_page: u64,
    /// The number of items per page when not specified in a request.
    pub default_page_size: u64,
    /// The most items a request may ask for in one page.
    pub max_page_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page: 1,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl PaginationConfig {
    /// Resolve the requested page number and size against the defaults.
    ///
    /// Page numbers start at 1. The page size is clamped to
    /// `1..=max_page_size`.
    pub fn page(&self, page: Option<u64>, per_page: Option<u64>) -> Page {
        let number = page.unwrap_or(self.default_page).max(1);
        let size = per_page
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1));

        Page { number, size }
    }
}

/// A page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// The 1-based page number.
    pub number: u64,
    /// The number of items on a full page.
    pub size: u64,
}

impl Page {
    /// The number of items that come before this page.
    pub fn offset(&self) -> u64 {
        (self.number - 1).saturating_mul(self.size)
    }
}

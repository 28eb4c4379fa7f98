//! Pagination and result types for query results.
//!
//! [`Pagination`] selects a 1-indexed page of bounded size, [`QueryResult`] carries one page
//! of records together with its [`PaginationMetadata`].

use serde::{Deserialize, Serialize};
use std::cmp::min;

use crate::error::{StoreError, StoreResult};

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: usize = 1000;
/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Which page of results to return.
///
/// Pages are 1-indexed and hold between 1 and [`MAX_PAGE_SIZE`] items.
///
/// # Example
///
/// ```ignore
/// use recordlayer_core::page::Pagination;
///
/// let pagination = Pagination::new(3, 10)?;
/// assert_eq!(pagination.offset(), 20);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "PaginationRepr")]
pub struct Pagination {
    page: usize,
    page_size: usize,
}

impl Pagination {
    /// Creates pagination parameters, rejecting a page below 1 or a size outside
    /// `1..=MAX_PAGE_SIZE`.
    pub fn new(page: usize, page_size: usize) -> StoreResult<Self> {
        if page < 1 {
            return Err(StoreError::InvalidQuery(format!(
                "Page number must be at least 1, got {}",
                page
            )));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(StoreError::InvalidQuery(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }

        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of items to skip, for `LIMIT`/`OFFSET` style backends.
    ///
    /// Saturates at `usize::MAX`, so a page number too large to address still selects
    /// nothing rather than wrapping around.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Slices an in-memory result set according to these parameters.
    ///
    /// The metadata reflects the full length of `items`, so a page past the end yields no
    /// records but the real total.
    pub fn paginate<T>(&self, items: Vec<T>) -> QueryResult<T> {
        let total = items.len();
        let start = min(self.offset(), total);
        let end = min(start.saturating_add(self.page_size), total);

        let records = items
            .into_iter()
            .skip(start)
            .take(end - start)
            .collect::<Vec<_>>();

        QueryResult::new(records, PaginationMetadata::new(total, self))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, page_size: DEFAULT_PAGE_SIZE }
    }
}

#[derive(Deserialize)]
struct PaginationRepr {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl TryFrom<PaginationRepr> for Pagination {
    type Error = StoreError;

    fn try_from(repr: PaginationRepr) -> Result<Self, Self::Error> {
        Pagination::new(repr.page, repr.page_size)
    }
}

/// Navigation data describing one page of a larger result set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationMetadata {
    /// Matching items across all pages.
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    /// `ceil(total_count / page_size)`, zero when nothing matched.
    pub total_pages: usize,
}

impl PaginationMetadata {
    pub fn new(total_count: usize, pagination: &Pagination) -> Self {
        Self {
            total_count,
            page: pagination.page(),
            page_size: pagination.page_size(),
            total_pages: total_count.div_ceil(pagination.page_size()),
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// A page of query results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub records: Vec<T>,
    pub metadata: PaginationMetadata,
}

impl<T> QueryResult<T> {
    pub fn new(records: Vec<T>, metadata: PaginationMetadata) -> Self {
        Self { records, metadata }
    }

    /// Transforms every record, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> QueryResult<U> {
        QueryResult {
            records: self.records.into_iter().map(f).collect(),
            metadata: self.metadata,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PAGE_SIZE, FILTER_LEADERBOARD_TYPE, FILTER_TIME_FRAME};
use crate::error::QueryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Score,
    Rank,
    Name,
    Country,
    RecentActivity,
}

/// Immutable description of what to fetch. Value equality over all fields
/// decides whether a committed change replaces the window or appends to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub sort_key: SortKey,
    pub sort_descending: bool,
    pub search_term: String,
    pub filters: BTreeMap<String, String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            sort_key: SortKey::Score,
            sort_descending: true,
            search_term: String::new(),
            filters: BTreeMap::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Query {
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.page < 1 {
            return Err(QueryError::PageOutOfRange {
                page: self.page,
                total_pages: 0,
            });
        }
        if self.page_size < 1 {
            return Err(QueryError::ZeroPageSize);
        }
        Ok(())
    }
}

/// How a committed query change relates to the previous one: a page-only
/// difference extends the current window, anything else starts over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryChange {
    Replace,
    Append,
}

pub(crate) struct QueryState {
    committed: Query,
}

impl QueryState {
    pub(crate) fn new(page_size: u32) -> Self {
        Self {
            committed: Query {
                page_size,
                ..Query::default()
            },
        }
    }

    pub(crate) fn committed(&self) -> &Query {
        &self.committed
    }

    fn commit(&mut self, next: Query) -> Option<QueryChange> {
        if next == self.committed {
            return None;
        }
        let page_only = {
            let mut probe = next.clone();
            probe.page = self.committed.page;
            probe == self.committed
        };
        if page_only {
            self.committed = next;
            return Some(QueryChange::Append);
        }
        let mut next = next;
        next.page = 1;
        if next == self.committed {
            return None;
        }
        self.committed = next;
        Some(QueryChange::Replace)
    }

    /// Same key toggles direction; a new key starts descending.
    pub(crate) fn set_sort(&mut self, key: SortKey) -> Option<QueryChange> {
        let mut next = self.committed.clone();
        if next.sort_key == key {
            next.sort_descending = !next.sort_descending;
        } else {
            next.sort_key = key;
            next.sort_descending = true;
        }
        self.commit(next)
    }

    pub(crate) fn commit_search(&mut self, term: &str) -> Option<QueryChange> {
        let mut next = self.committed.clone();
        next.search_term = term.trim().to_string();
        self.commit(next)
    }

    /// An empty value removes the filter.
    pub(crate) fn set_filter(&mut self, name: &str, value: &str) -> Option<QueryChange> {
        let mut next = self.committed.clone();
        let value = value.trim();
        if value.is_empty() {
            next.filters.remove(name);
        } else {
            next.filters.insert(name.to_string(), value.to_string());
        }
        self.commit(next)
    }

    pub(crate) fn set_leaderboard_type(&mut self, value: &str) -> Option<QueryChange> {
        self.set_filter(FILTER_LEADERBOARD_TYPE, value)
    }

    pub(crate) fn set_time_frame(&mut self, value: &str) -> Option<QueryChange> {
        self.set_filter(FILTER_TIME_FRAME, value)
    }

    pub(crate) fn set_page(&mut self, page: u32) -> Option<QueryChange> {
        let mut next = self.committed.clone();
        next.page = page;
        self.commit(next)
    }

    pub(crate) fn set_page_size(&mut self, page_size: u32) -> Option<QueryChange> {
        let mut next = self.committed.clone();
        next.page_size = page_size;
        self.commit(next)
    }

    /// Explicit page navigation bypasses change classification: the caller
    /// always issues a Replace fetch for the target page.
    pub(crate) fn force_page(&mut self, page: u32) {
        self.committed.page = page;
    }
}

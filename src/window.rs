use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::Query;

pub type EntityId = String;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub entity_id: EntityId,
    pub rank: u32,
    pub score: f64,
    pub last_updated_at: u64,
    #[serde(default)]
    pub previous_rank: Option<u32>,
}

/// The materialized slice of the ranked dataset for the current query.
/// Populated by fetch responses, mutated in place by live reconciliation,
/// replaced wholesale only when the query changes incomparably.
#[derive(Clone, Debug)]
pub struct Window {
    entries: Vec<Entry>,
    total_count: u64,
    loaded_through_page: u32,
    query: Query,
}

impl Window {
    pub(crate) fn new(query: Query) -> Self {
        Self {
            entries: Vec::new(),
            total_count: 0,
            loaded_through_page: 0,
            query,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn loaded_through_page(&self) -> u32 {
        self.loaded_through_page
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn total_pages(&self) -> u32 {
        if self.total_count == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.query.page_size as u64) as u32
    }

    pub fn can_next(&self) -> bool {
        self.query.page < self.total_pages()
    }

    pub fn can_previous(&self) -> bool {
        self.query.page > 1
    }

    pub(crate) fn position_of(&self, entity_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.entity_id == entity_id)
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<Entry> {
        &mut self.entries
    }

    /// Discards the old window and materializes the response page. Entries the
    /// live channel touched after the fetch was issued keep their fresher
    /// rank/score instead of being clobbered by the older snapshot.
    pub(crate) fn replace(
        &mut self,
        query: Query,
        mut entries: Vec<Entry>,
        total_count: u64,
        issued_at: u64,
    ) {
        let mut seen: HashSet<EntityId> = HashSet::new();
        entries.retain(|entry| seen.insert(entry.entity_id.clone()));

        for entry in &mut entries {
            let old = self
                .entries
                .iter()
                .find(|old| old.entity_id == entry.entity_id);
            if let Some(old) = old {
                if old.last_updated_at > issued_at {
                    debug!(
                        entity_id = %entry.entity_id,
                        live_ts = old.last_updated_at,
                        issued_at,
                        "replace keeps fresher live entry"
                    );
                    entry.rank = old.rank;
                    entry.score = old.score;
                    entry.last_updated_at = old.last_updated_at;
                    entry.previous_rank = old.previous_rank;
                }
            }
        }

        self.entries = entries;
        self.total_count = total_count;
        self.loaded_through_page = query.page;
        self.query = query;
    }

    /// Concatenates the next page, rejecting entity ids already materialized
    /// (first occurrence wins). Returns how many entries were appended.
    pub(crate) fn append(&mut self, page: u32, entries: Vec<Entry>, total_count: u64) -> usize {
        let mut present: HashSet<EntityId> = self
            .entries
            .iter()
            .map(|entry| entry.entity_id.clone())
            .collect();

        let mut appended = 0;
        for entry in entries {
            if !present.insert(entry.entity_id.clone()) {
                debug!(entity_id = %entry.entity_id, page, "append skipped duplicate entry");
                continue;
            }
            self.entries.push(entry);
            appended += 1;
        }

        self.total_count = total_count;
        self.loaded_through_page = page;
        self.query.page = page;
        appended
    }

    pub(crate) fn clear(&mut self, query: Query, total_count: u64) {
        self.entries.clear();
        self.total_count = total_count;
        self.loaded_through_page = query.page;
        self.query = query;
    }
}

/// Cloned view of the window for hosts and tests.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub entries: Vec<Entry>,
    pub total_count: u64,
    pub loaded_through_page: u32,
    pub page: u32,
    pub total_pages: u32,
}

impl Window {
    pub(crate) fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            entries: self.entries.clone(),
            total_count: self.total_count,
            loaded_through_page: self.loaded_through_page,
            page: self.query.page,
            total_pages: self.total_pages(),
        }
    }
}

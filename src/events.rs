use serde::Serialize;

use crate::pool::HandleId;
use crate::window::{Entry, EntityId};

/// Top-level lifecycle of the current query. Append loading is deliberately
/// not part of this: it is surfaced to the load-more affordance alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Empty,
    Error,
}

/// Ordered instruction stream for the view layer. The engine performs no
/// rendering; every state transition, bind/unbind, rank transition, and
/// pagination change arrives here in the order it happened.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    StateChanged {
        state: LoadState,
        error: Option<String>,
    },
    EntryBound {
        handle: HandleId,
        entry: Entry,
        position: usize,
    },
    EntryUnbound {
        handle: HandleId,
    },
    RankTransition {
        entity_id: EntityId,
        delta: i64,
    },
    PaginationChanged {
        page: u32,
        total_pages: u32,
        can_next: bool,
        can_previous: bool,
    },
    AppendStateChanged {
        loading: bool,
    },
}

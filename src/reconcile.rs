use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::SortKey;
use crate::window::{EntityId, Window};

/// One push event from the live update channel. Delivery is neither ordered
/// nor exactly-once; the reconciler drops duplicates and stale timestamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    pub entity_id: EntityId,
    pub score: f64,
    pub rank: u32,
    pub timestamp: u64,
}

/// Transition descriptor for the view layer. Positive delta means the entry
/// moved toward rank 1; zero means the value changed but the position did not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankTransition {
    pub entity_id: EntityId,
    pub delta: i64,
}

#[derive(Debug, PartialEq)]
pub(crate) enum ReconcileOutcome {
    Applied(RankTransition),
    NotPresent,
    StaleTimestamp,
}

/// Merges a single live update into the window without a refetch.
pub(crate) fn apply_live_update(window: &mut Window, update: &LiveUpdate) -> ReconcileOutcome {
    let Some(index) = window.position_of(&update.entity_id) else {
        return ReconcileOutcome::NotPresent;
    };

    let previous_rank;
    {
        let entry = &mut window.entries_mut()[index];
        if update.timestamp < entry.last_updated_at {
            debug!(
                entity_id = %update.entity_id,
                update_ts = update.timestamp,
                stored_ts = entry.last_updated_at,
                "dropped out-of-order live update"
            );
            return ReconcileOutcome::StaleTimestamp;
        }

        previous_rank = entry.rank;
        entry.previous_rank = Some(previous_rank);
        entry.score = update.score;
        entry.rank = update.rank;
        entry.last_updated_at = update.timestamp;
    }

    let delta = previous_rank as i64 - update.rank as i64;

    if previous_rank != update.rank {
        reposition(window, index);
    }

    ReconcileOutcome::Applied(RankTransition {
        entity_id: update.entity_id.clone(),
        delta,
    })
}

/// The window stays ordered by rank only when the sort key is rank-affine;
/// name/country/activity orders leave the entry where it is.
fn rank_ascending(window: &Window) -> Option<bool> {
    let query = window.query();
    match query.sort_key {
        SortKey::Score => Some(query.sort_descending),
        SortKey::Rank => Some(!query.sort_descending),
        _ => None,
    }
}

/// Moves the updated entry to its deterministic position: rank order per the
/// window direction, ties broken by entity id ascending. Touches only the
/// span between the old and new index.
fn reposition(window: &mut Window, index: usize) {
    let Some(ascending) = rank_ascending(window) else {
        return;
    };

    let entry = window.entries_mut().remove(index);
    let rank = entry.rank;
    let entity_id = entry.entity_id.clone();

    let target = if ascending {
        window.entries().partition_point(|other| {
            (other.rank, other.entity_id.as_str()) < (rank, entity_id.as_str())
        })
    } else {
        window.entries().partition_point(|other| {
            (Reverse(other.rank), other.entity_id.as_str())
                < (Reverse(rank), entity_id.as_str())
        })
    };

    window.entries_mut().insert(target, entry);
}

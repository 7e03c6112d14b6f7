use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::query::Query;
use crate::reconcile::LiveUpdate;
use crate::window::Entry;

/// One page of results. Entries arrive already sorted and filtered per the
/// query; `total_count` spans all pages of the match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPage {
    pub entries: Vec<Entry>,
    pub total_count: u64,
}

/// The backing data service. Injected at engine construction, never looked up
/// ambiently. Must be idempotent for equal query values so retries are safe.
#[async_trait]
pub trait LeaderboardService: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<FetchPage, FetchError>;
}

/// The push channel for out-of-band score/rank updates. Each `subscribe` call
/// returns an independent stream; the engine drains one for its lifetime.
pub trait LiveUpdateChannel: Send + Sync {
    fn subscribe(&self) -> BoxStream<'static, LiveUpdate>;
}

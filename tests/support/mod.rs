use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::{broadcast, mpsc};

use rank_window::{
    EngineConfig, EngineEvent, Entry, FetchError, FetchPage, LeaderboardService, LiveUpdate,
    LiveUpdateChannel, Query, SyncEngine,
};

pub fn test_config() -> EngineConfig {
    EngineConfig {
        debounce: Duration::from_millis(300),
        scroll_threshold: 0.8,
        fetch_timeout: Duration::from_secs(10),
        page_size: 25,
        max_pool_size: 64,
        metrics_interval: Duration::ZERO,
    }
}

pub fn player_id(rank: u64) -> String {
    format!("player-{rank:03}")
}

/// Deterministic backing data: `total` players ranked 1..=total, filtered by
/// substring match on the player id, paged per the query.
pub fn page_for(query: &Query, total: u64) -> FetchPage {
    let term = query.search_term.as_str();
    let matching: Vec<u64> = (1..=total)
        .filter(|rank| term.is_empty() || player_id(*rank).contains(term))
        .collect();

    let start = (query.page.saturating_sub(1) as usize) * query.page_size as usize;
    let entries = matching
        .iter()
        .skip(start)
        .take(query.page_size as usize)
        .enumerate()
        .map(|(offset, backing_rank)| Entry {
            entity_id: player_id(*backing_rank),
            rank: (start + offset + 1) as u32,
            score: (10_000 - backing_rank * 10) as f64,
            last_updated_at: 1_000,
            previous_rank: None,
        })
        .collect();

    FetchPage {
        entries,
        total_count: matching.len() as u64,
    }
}

pub struct ScriptedService {
    total: u64,
    calls: Mutex<Vec<Query>>,
    delays: Mutex<VecDeque<Duration>>,
    fail_next: Mutex<u32>,
}

impl ScriptedService {
    pub fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            total,
            calls: Mutex::new(Vec::new()),
            delays: Mutex::new(VecDeque::new()),
            fail_next: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Query> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Queues a delay consumed by the next fetch, in call order.
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }

    pub fn fail_times(&self, count: u32) {
        *self.fail_next.lock().unwrap() = count;
    }
}

#[async_trait]
impl LeaderboardService for ScriptedService {
    async fn fetch(&self, query: &Query) -> Result<FetchPage, FetchError> {
        let delay = self
            .delays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Duration::ZERO);
        self.calls.lock().unwrap().push(query.clone());

        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(FetchError::Service("scripted failure".to_string()));
            }
        }

        Ok(page_for(query, self.total))
    }
}

pub struct ScriptedLiveChannel {
    tx: mpsc::UnboundedSender<LiveUpdate>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LiveUpdate>>>,
}

impl ScriptedLiveChannel {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<LiveUpdate> {
        self.tx.clone()
    }
}

impl LiveUpdateChannel for ScriptedLiveChannel {
    fn subscribe(&self) -> BoxStream<'static, LiveUpdate> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("live channel supports a single subscriber");
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        }))
    }
}

pub fn engine_with(
    service: Arc<ScriptedService>,
    live: Arc<ScriptedLiveChannel>,
) -> SyncEngine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rank_window=warn".into()),
        )
        .with_test_writer()
        .try_init();
    SyncEngine::new(service, live, test_config())
}

pub fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Lets spawned fetch/debounce/live tasks run to completion under the paused
/// test clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub async fn settle_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

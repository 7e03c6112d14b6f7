use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::constants::EVENT_BUFFER;
use crate::debounce::SearchDebouncer;
use crate::error::{FetchError, QueryError};
use crate::events::{EngineEvent, LoadState};
use crate::fetch::{FetchCoordinator, FetchMode, InFlightFetch};
use crate::pool::{HandleId, RowViewPool};
use crate::query::{Query, QueryChange, QueryState, SortKey};
use crate::reconcile::{apply_live_update, LiveUpdate, ReconcileOutcome};
use crate::service::{FetchPage, LeaderboardService, LiveUpdateChannel};
use crate::window::{EntityId, Window, WindowSnapshot};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetrics {
    pub stale_fetches_discarded: u64,
    pub live_updates_applied: u64,
    pub live_updates_ignored: u64,
    pub live_updates_stale: u64,
    pub pool_evictions: u64,
}

struct EngineInner {
    query_state: QueryState,
    window: Window,
    pool: RowViewPool,
    coordinator: FetchCoordinator,
    debouncer: SearchDebouncer,
    state: LoadState,
    append_loading: bool,
    visible: Vec<EntityId>,
    last_scroll: f64,
    started: bool,
    disposed: bool,
    live_applied: u64,
    live_ignored: u64,
    live_stale: u64,
}

impl EngineInner {
    fn set_state(
        &mut self,
        state: LoadState,
        error: Option<String>,
        events: &broadcast::Sender<EngineEvent>,
    ) {
        if self.state == state && error.is_none() {
            return;
        }
        self.state = state;
        let _ = events.send(EngineEvent::StateChanged { state, error });
    }

    fn issue(&mut self, mode: FetchMode, events: &broadcast::Sender<EngineEvent>) -> InFlightFetch {
        let query = self.query_state.committed().clone();
        let flight = self.coordinator.issue(query, mode);
        debug!(
            generation = flight.generation,
            ?mode,
            page = flight.query.page,
            "issuing fetch"
        );
        match mode {
            FetchMode::Replace => self.set_state(LoadState::Loading, None, events),
            FetchMode::Append => {
                self.append_loading = true;
                let _ = events.send(EngineEvent::AppendStateChanged { loading: true });
            }
        }
        flight
    }

    fn apply_fetch(
        &mut self,
        flight: InFlightFetch,
        result: Result<FetchPage, FetchError>,
        events: &broadcast::Sender<EngineEvent>,
    ) {
        if self.disposed {
            return;
        }
        let mode = flight.mode;
        if self.coordinator.accept(flight.generation).is_none() {
            // An orphaned append still re-arms the scroll trigger.
            if mode == FetchMode::Append && self.append_loading {
                self.append_loading = false;
                let _ = events.send(EngineEvent::AppendStateChanged { loading: false });
            }
            return;
        }

        // Any append that was in flight belongs to an older generation now.
        if mode == FetchMode::Replace && self.append_loading {
            self.append_loading = false;
            let _ = events.send(EngineEvent::AppendStateChanged { loading: false });
        }

        match (mode, result) {
            (FetchMode::Replace, Ok(page)) => self.apply_replace(flight, page, events),
            (FetchMode::Replace, Err(err)) => {
                warn!(generation = flight.generation, error = %err, "replace fetch failed");
                self.set_state(LoadState::Error, Some(err.to_string()), events);
            }
            (FetchMode::Append, Ok(page)) => self.apply_append(flight, page, events),
            (FetchMode::Append, Err(err)) => {
                warn!(generation = flight.generation, error = %err, "append fetch failed");
                self.append_loading = false;
                let _ = events.send(EngineEvent::AppendStateChanged { loading: false });
            }
        }
    }

    fn apply_replace(
        &mut self,
        flight: InFlightFetch,
        page: FetchPage,
        events: &broadcast::Sender<EngineEvent>,
    ) {
        let query = flight.query;
        if page.total_count == 0 {
            self.window.clear(query, 0);
            self.unbind_all(events);
            self.set_state(LoadState::Empty, None, events);
            self.emit_pagination(events);
            return;
        }

        self.window
            .replace(query, page.entries, page.total_count, flight.issued_at);
        self.set_state(LoadState::Loaded, None, events);
        self.rebind_window(events);
        self.emit_pagination(events);
    }

    fn apply_append(
        &mut self,
        flight: InFlightFetch,
        page: FetchPage,
        events: &broadcast::Sender<EngineEvent>,
    ) {
        let before = self.window.entries().len();
        let appended = self
            .window
            .append(flight.query.page, page.entries, page.total_count);
        debug!(
            page = flight.query.page,
            appended,
            total = self.window.entries().len(),
            "append merged"
        );
        self.append_loading = false;
        let _ = events.send(EngineEvent::AppendStateChanged { loading: false });
        self.bind_tail(before, events);
        self.emit_pagination(events);
    }

    fn rebind_window(&mut self, events: &broadcast::Sender<EngineEvent>) {
        let next: Vec<EntityId> = self
            .window
            .entries()
            .iter()
            .map(|entry| entry.entity_id.clone())
            .collect();
        let next_set: HashSet<&EntityId> = next.iter().collect();

        let old = std::mem::take(&mut self.visible);
        for entity in &old {
            if next_set.contains(entity) {
                continue;
            }
            if let Some(handle) = self.pool.bound_handle(entity) {
                self.pool.release(handle);
                let _ = events.send(EngineEvent::EntryUnbound { handle });
            }
        }

        for (position, entry) in self.window.entries().iter().enumerate() {
            let handle = self.pool.acquire(&entry.entity_id);
            let _ = events.send(EngineEvent::EntryBound {
                handle,
                entry: entry.clone(),
                position,
            });
        }

        self.visible = next;
    }

    fn bind_tail(&mut self, start: usize, events: &broadcast::Sender<EngineEvent>) {
        let mut bound: Vec<EntityId> = Vec::new();
        for (position, entry) in self.window.entries().iter().enumerate().skip(start) {
            let handle = self.pool.acquire(&entry.entity_id);
            let _ = events.send(EngineEvent::EntryBound {
                handle,
                entry: entry.clone(),
                position,
            });
            bound.push(entry.entity_id.clone());
        }
        self.visible.extend(bound);
    }

    fn unbind_all(&mut self, events: &broadcast::Sender<EngineEvent>) {
        for entity in std::mem::take(&mut self.visible) {
            if let Some(handle) = self.pool.bound_handle(&entity) {
                self.pool.release(handle);
                let _ = events.send(EngineEvent::EntryUnbound { handle });
            }
        }
    }

    fn emit_pagination(&self, events: &broadcast::Sender<EngineEvent>) {
        let _ = events.send(EngineEvent::PaginationChanged {
            page: self.window.query().page,
            total_pages: self.window.total_pages(),
            can_next: self.window.can_next(),
            can_previous: self.window.can_previous(),
        });
    }

    fn apply_live(&mut self, update: LiveUpdate, events: &broadcast::Sender<EngineEvent>) {
        if self.disposed {
            return;
        }
        match apply_live_update(&mut self.window, &update) {
            ReconcileOutcome::Applied(transition) => {
                self.live_applied += 1;
                let _ = events.send(EngineEvent::RankTransition {
                    entity_id: transition.entity_id,
                    delta: transition.delta,
                });
            }
            ReconcileOutcome::NotPresent => {
                self.live_ignored += 1;
                debug!(entity_id = %update.entity_id, "live update outside materialized window");
            }
            ReconcileOutcome::StaleTimestamp => {
                self.live_stale += 1;
            }
        }
    }

    fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            stale_fetches_discarded: self.coordinator.stale_discards(),
            live_updates_applied: self.live_applied,
            live_updates_ignored: self.live_ignored,
            live_updates_stale: self.live_stale,
            pool_evictions: self.pool.evictions(),
        }
    }
}

/// The orchestrator. Owns the query state, drives fetches on query change or
/// scroll threshold, reconciles live updates, and emits ordered render
/// instructions; all state sits behind one mutex so mutators and event
/// emission are sequential and non-reentrant.
pub struct SyncEngine {
    inner: Arc<Mutex<EngineInner>>,
    service: Arc<dyn LeaderboardService>,
    live: Arc<dyn LiveUpdateChannel>,
    events: broadcast::Sender<EngineEvent>,
    config: EngineConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        service: Arc<dyn LeaderboardService>,
        live: Arc<dyn LiveUpdateChannel>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let query_state = QueryState::new(config.page_size);
        let window = Window::new(query_state.committed().clone());
        let inner = EngineInner {
            query_state,
            window,
            pool: RowViewPool::new(config.max_pool_size),
            coordinator: FetchCoordinator::new(),
            debouncer: SearchDebouncer::new(),
            state: LoadState::Idle,
            append_loading: false,
            visible: Vec::new(),
            last_scroll: 0.0,
            started: false,
            disposed: false,
            live_applied: 0,
            live_ignored: 0,
            live_stale: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            service,
            live,
            events,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Issues the initial fetch and subscribes to the live update channel.
    /// Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let flight = {
            let mut inner = self.inner.lock().await;
            if inner.disposed || inner.started {
                return;
            }
            inner.started = true;
            inner.issue(FetchMode::Replace, &self.events)
        };
        self.spawn_fetch(flight);

        let mut stream = self.live.subscribe();
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        let live_task = tokio::spawn(async move {
            while let Some(update) = stream.next().await {
                inner.lock().await.apply_live(update, &events);
            }
            debug!("live update channel closed");
        });
        self.tasks.lock().await.push(live_task);

        if !self.config.metrics_interval.is_zero() {
            let task = spawn_metrics_logger(
                Arc::clone(&self.inner),
                self.events.clone(),
                self.config.metrics_interval,
            );
            self.tasks.lock().await.push(task);
        }
    }

    /// Records the text immediately and commits it after the quiet period,
    /// unless another edit arrives first.
    pub async fn set_search_term(&self, text: &str) {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.disposed {
                return;
            }
            inner.debouncer.record(text)
        };

        let inner_arc = Arc::clone(&self.inner);
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        let quiet = self.config.debounce;
        let fetch_timeout = self.config.fetch_timeout;
        tokio::spawn(async move {
            sleep(quiet).await;
            let flight = {
                let mut inner = inner_arc.lock().await;
                if inner.disposed {
                    return;
                }
                let Some(term) = inner.debouncer.commit(epoch) else {
                    return;
                };
                let Some(change) = inner.query_state.commit_search(&term) else {
                    return;
                };
                debug!(term = %term, ?change, "committed debounced search term");
                inner.issue(FetchMode::Replace, &events)
            };
            spawn_fetch_task(service, inner_arc, events, fetch_timeout, flight);
        });
    }

    async fn commit_with<F>(&self, mutate: F)
    where
        F: FnOnce(&mut QueryState) -> Option<QueryChange>,
    {
        let flight = {
            let mut inner = self.inner.lock().await;
            if inner.disposed {
                return;
            }
            let Some(change) = mutate(&mut inner.query_state) else {
                return;
            };
            let mode = match change {
                QueryChange::Replace => FetchMode::Replace,
                QueryChange::Append => FetchMode::Append,
            };
            inner.issue(mode, &self.events)
        };
        self.spawn_fetch(flight);
    }

    pub async fn set_sort(&self, key: SortKey) {
        self.commit_with(|query_state| query_state.set_sort(key)).await;
    }

    pub async fn set_filter(&self, name: &str, value: &str) {
        self.commit_with(|query_state| query_state.set_filter(name, value))
            .await;
    }

    pub async fn set_leaderboard_type(&self, value: &str) {
        self.commit_with(|query_state| query_state.set_leaderboard_type(value))
            .await;
    }

    pub async fn set_time_frame(&self, value: &str) {
        self.commit_with(|query_state| query_state.set_time_frame(value))
            .await;
    }

    pub async fn set_page_size(&self, page_size: u32) -> Result<(), QueryError> {
        if page_size < 1 {
            return Err(QueryError::ZeroPageSize);
        }
        self.commit_with(|query_state| query_state.set_page_size(page_size))
            .await;
        Ok(())
    }

    /// Explicit navigation: always a Replace fetch for the single target page,
    /// with the scroll position reset to top.
    pub async fn go_to_page(&self, page: u32) -> Result<(), QueryError> {
        let flight = {
            let mut inner = self.inner.lock().await;
            if inner.disposed {
                return Ok(());
            }
            let total_pages = inner.window.total_pages();
            if page < 1 || (total_pages > 0 && page > total_pages) {
                return Err(QueryError::PageOutOfRange { page, total_pages });
            }
            inner.query_state.force_page(page);
            inner.last_scroll = 0.0;
            inner.issue(FetchMode::Replace, &self.events)
        };
        self.spawn_fetch(flight);
        Ok(())
    }

    /// Normalized scroll position in [0, 1]. Requests the next page only past
    /// the threshold, on a strictly increasing position, with no append in
    /// flight and more pages left.
    pub async fn on_scroll(&self, position: f64) {
        let flight = {
            let mut inner = self.inner.lock().await;
            if inner.disposed {
                return;
            }
            let position = position.clamp(0.0, 1.0);
            let previous = inner.last_scroll;
            inner.last_scroll = position;
            if position < self.config.scroll_threshold || position <= previous {
                return;
            }
            if inner.append_loading || inner.state != LoadState::Loaded {
                return;
            }
            if !inner.window.can_next() {
                return;
            }
            let next_page = inner.window.loaded_through_page() + 1;
            let Some(QueryChange::Append) = inner.query_state.set_page(next_page) else {
                return;
            };
            inner.issue(FetchMode::Append, &self.events)
        };
        self.spawn_fetch(flight);
    }

    pub async fn on_live_update(&self, update: LiveUpdate) {
        let mut inner = self.inner.lock().await;
        inner.apply_live(update, &self.events);
    }

    /// Caller-triggered retry of the committed query; there is no automatic
    /// retry on fetch failure.
    pub async fn retry(&self) {
        let flight = {
            let mut inner = self.inner.lock().await;
            if inner.disposed {
                return;
            }
            inner.issue(FetchMode::Replace, &self.events)
        };
        self.spawn_fetch(flight);
    }

    /// The one pool operation the view layer may perform: marking a row
    /// offscreen. The binding survives so the row reacquires the same handle
    /// when it scrolls back.
    pub async fn release_handle(&self, handle: HandleId) {
        let mut inner = self.inner.lock().await;
        inner.pool.release(handle);
    }

    pub async fn dispose(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.unbind_all(&self.events);
            inner.set_state(LoadState::Idle, None, &self.events);
        }
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }

    pub async fn load_state(&self) -> LoadState {
        self.inner.lock().await.state
    }

    pub async fn is_append_loading(&self) -> bool {
        self.inner.lock().await.append_loading
    }

    pub async fn snapshot(&self) -> WindowSnapshot {
        self.inner.lock().await.window.snapshot()
    }

    pub async fn committed_query(&self) -> Query {
        self.inner.lock().await.query_state.committed().clone()
    }

    pub async fn metrics(&self) -> EngineMetrics {
        self.inner.lock().await.metrics()
    }

    fn spawn_fetch(&self, flight: InFlightFetch) {
        spawn_fetch_task(
            Arc::clone(&self.service),
            Arc::clone(&self.inner),
            self.events.clone(),
            self.config.fetch_timeout,
            flight,
        );
    }
}

fn spawn_fetch_task(
    service: Arc<dyn LeaderboardService>,
    inner: Arc<Mutex<EngineInner>>,
    events: broadcast::Sender<EngineEvent>,
    fetch_timeout: Duration,
    flight: InFlightFetch,
) {
    tokio::spawn(async move {
        let result = match timeout(fetch_timeout, service.fetch(&flight.query)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(fetch_timeout)),
        };
        let mut inner = inner.lock().await;
        inner.apply_fetch(flight, result, &events);
    });
}

fn spawn_metrics_logger(
    inner: Arc<Mutex<EngineInner>>,
    events: broadcast::Sender<EngineEvent>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if events.receiver_count() == 0 {
                continue;
            }
            let inner = inner.lock().await;
            let metrics = inner.metrics();
            info!(
                stale_fetches = metrics.stale_fetches_discarded,
                live_applied = metrics.live_updates_applied,
                live_ignored = metrics.live_updates_ignored,
                live_stale = metrics.live_updates_stale,
                pool_evictions = metrics.pool_evictions,
                pool_handles = inner.pool.len(),
                generation = inner.coordinator.generation(),
                "engine metrics"
            );
        }
    })
}

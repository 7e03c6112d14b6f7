//! Leaderboard query and window synchronization engine: query state with
//! debounced search, generation-tagged fetches, an identity-keyed row view
//! pool, and in-place reconciliation of live rank updates.

mod config;
mod constants;
mod debounce;
mod engine;
mod error;
mod events;
mod fetch;
mod pool;
mod query;
mod reconcile;
mod service;
mod util;
mod window;


pub use config::EngineConfig;
pub use engine::{EngineMetrics, SyncEngine};
pub use error::{FetchError, QueryError};
pub use events::{EngineEvent, LoadState};
pub use fetch::FetchMode;
pub use pool::HandleId;
pub use query::{Query, QueryChange, SortKey};
pub use reconcile::{LiveUpdate, RankTransition};
pub use service::{FetchPage, LeaderboardService, LiveUpdateChannel};
pub use window::{Entry, EntityId, WindowSnapshot};

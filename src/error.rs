use std::time::Duration;

use thiserror::Error;

/// Rejected synchronously at the mutator call site; never reaches the service.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("page {page} out of range 1..={total_pages}")]
    PageOutOfRange { page: u32, total_pages: u32 },
    #[error("page size must be at least 1")]
    ZeroPageSize,
}

/// Service-side failure. Recoverable: the previous window stays intact and the
/// caller decides when to retry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("leaderboard service error: {0}")]
    Service(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

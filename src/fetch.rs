use tracing::debug;

use crate::query::Query;
use crate::util::now_ms;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchMode {
    Replace,
    Append,
}

#[derive(Clone, Debug)]
pub(crate) struct InFlightFetch {
    pub(crate) generation: u64,
    pub(crate) query: Query,
    pub(crate) mode: FetchMode,
    pub(crate) issued_at: u64,
}

/// Tags every fetch with a monotonically increasing generation. The counter
/// is bumped synchronously at issue time, before the service call is
/// dispatched; superseded responses are suppressed at apply time.
pub(crate) struct FetchCoordinator {
    generation: u64,
    in_flight: Option<InFlightFetch>,
    stale_discards: u64,
}

impl FetchCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            in_flight: None,
            stale_discards: 0,
        }
    }

    pub(crate) fn issue(&mut self, query: Query, mode: FetchMode) -> InFlightFetch {
        self.generation += 1;
        let flight = InFlightFetch {
            generation: self.generation,
            query,
            mode,
            issued_at: now_ms(),
        };
        self.in_flight = Some(flight.clone());
        flight
    }

    /// A response is applied only while its generation is still current;
    /// anything else is discarded silently.
    pub(crate) fn accept(&mut self, generation: u64) -> Option<InFlightFetch> {
        if generation != self.generation {
            self.stale_discards += 1;
            debug!(
                generation,
                current = self.generation,
                "discarded stale fetch response"
            );
            return None;
        }
        self.in_flight.take()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn stale_discards(&self) -> u64 {
        self.stale_discards
    }
}

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::error::AppResult;
use crate::ledger::models::ZombieCandidate;
use crate::ledger::TripStore;

/// Selects non-terminal trips whose local status is too old to trust
pub struct ZombieDetector {
    store: Arc<dyn TripStore>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
    batch_limit: i64,
}

impl ZombieDetector {
    pub fn new(
        store: Arc<dyn TripStore>,
        clock: Arc<dyn Clock>,
        staleness: Duration,
        batch_limit: i64,
    ) -> Self {
        Self {
            store,
            clock,
            staleness,
            batch_limit,
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Oldest first. Read-only: a store failure aborts the cycle before any write.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> AppResult<Vec<ZombieCandidate>> {
        let cutoff = self.clock.now() - self.staleness;
        let candidates = self.store.find_stale_trips(cutoff, self.batch_limit).await?;

        debug!(%cutoff, count = candidates.len(), "zombie scan finished");
        Ok(candidates)
    }
}

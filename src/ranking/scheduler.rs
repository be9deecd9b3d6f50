//! Debounced queue for region recomputation.
//!
//! Settlement fires a trigger per region-tagged decision; under bursty
//! settlement the same region key arrives many times in quick succession.
//! The worker coalesces keys received within a short window and recomputes
//! each distinct region once, bounding the cost of the full recompute.

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::ranking::recalculator::RankingRecalculator;

/// Handle used by the settlement engine to queue a region recompute.
#[derive(Clone)]
pub struct RankingTrigger {
    tx: mpsc::UnboundedSender<String>,
}

impl RankingTrigger {
    pub fn trigger(&self, region: &str) {
        if self.tx.send(region.to_string()).is_err() {
            warn!(region, "Ranking worker is gone, trigger dropped");
        }
    }
}

/// Spawn the coalescing worker and return its trigger handle.
///
/// The worker runs until every trigger handle is dropped.
pub fn spawn_ranking_worker(
    recalculator: RankingRecalculator,
    debounce: Duration,
) -> RankingTrigger {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut pending: HashSet<String> = HashSet::new();
            pending.insert(first);

            // Coalesce every key that arrives inside the window.
            let deadline = Instant::now() + debounce;
            loop {
                match timeout_at(deadline, rx.recv()).await {
                    Ok(Some(region)) => {
                        pending.insert(region);
                    }
                    Ok(None) | Err(_) => break,
                }
            }

            debug!(regions = pending.len(), "Recomputing coalesced regions");
            for region in pending {
                if let Err(e) = recalculator.recalculate_region(&region) {
                    warn!(region = %region, error = %e, "Region recalculation failed");
                }
            }
        }
        debug!("Ranking worker stopped");
    });

    RankingTrigger { tx }
}

//! Settlement orchestration.
//!
//! `settle_decision` resolves every outstanding prediction for one decision;
//! `settle_all_resolved_decisions` sweeps resolved decisions in bounded
//! batches. Per-item failures are isolated: one bad prediction (or decision)
//! never blocks its siblings, it is recorded in the report and the batch
//! moves on. A scheduled re-run of the same entry point naturally retries
//! only still-unresolved items.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ranking::scheduler::RankingTrigger;
use crate::settlement::scoring;
use crate::store::{ApplyOutcome, SettlementStore};

/// Settlement was requested for a decision that has no recorded
/// resolution yet. Kept as a typed error so callers can map it to
/// not-found without matching on message text.
#[derive(Debug, Clone)]
pub struct MissingResolution {
    pub decision_id: String,
}

impl fmt::Display for MissingResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no resolution recorded for decision {}", self.decision_id)
    }
}

impl std::error::Error for MissingResolution {}

/// One isolated failure inside a settlement batch, with enough context
/// for operator follow-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementFailure {
    pub id: String,
    pub message: String,
}

/// Aggregate counters returned by the batch entry points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Unresolved predictions found when the batch started.
    pub processed: usize,
    /// Predictions actually settled by this call.
    pub resolved_count: usize,
    pub error_count: usize,
    pub failures: Vec<SettlementFailure>,
}

impl SettlementReport {
    fn absorb(&mut self, other: SettlementReport) {
        self.processed += other.processed;
        self.resolved_count += other.resolved_count;
        self.error_count += other.error_count;
        self.failures.extend(other.failures);
    }

    fn record_failure(&mut self, id: impl Into<String>, message: impl Into<String>) {
        self.error_count += 1;
        self.failures.push(SettlementFailure {
            id: id.into(),
            message: message.into(),
        });
    }
}

pub struct SettlementEngine {
    store: Arc<SettlementStore>,
    /// When present, region-tagged settlements queue a debounced
    /// leaderboard recomputation.
    ranking: Option<RankingTrigger>,
}

impl SettlementEngine {
    pub fn new(store: Arc<SettlementStore>, ranking: Option<RankingTrigger>) -> Self {
        Self { store, ranking }
    }

    /// Settle every outstanding prediction for one decision.
    ///
    /// Fails only on parameter problems or a missing resolution; everything
    /// past that point is per-item isolation.
    pub async fn settle_decision(&self, decision_id: &str) -> Result<SettlementReport> {
        if decision_id.trim().is_empty() {
            bail!("decision id must not be empty");
        }

        let resolution = self.store.get_resolution(decision_id)?.ok_or_else(|| {
            anyhow::Error::new(MissingResolution {
                decision_id: decision_id.to_string(),
            })
        })?;

        // Upstream confidence is not trusted; clamp before scoring.
        let confidence = resolution.confidence.clamp(0, 100);
        if confidence != resolution.confidence {
            warn!(
                decision_id,
                raw = resolution.confidence,
                "Resolution confidence out of range, clamped"
            );
        }

        let pending = self.store.unresolved_predictions(decision_id)?;
        let mut report = SettlementReport {
            processed: pending.len(),
            ..Default::default()
        };

        for prediction in &pending {
            let outcome = scoring::settle(
                prediction.issue,
                prediction.stake,
                resolution.issue,
                confidence,
            );

            let applied = self.store.apply_settlement(
                prediction,
                resolution.issue,
                outcome.seeds_earned,
                outcome.correct,
                &outcome.reason,
                resolution.region.is_some(),
            );

            match applied {
                Ok(ApplyOutcome::Applied {
                    level_before,
                    level_after,
                    new_balance,
                }) => {
                    report.resolved_count += 1;
                    debug!(
                        prediction_id = %prediction.id,
                        user_id = %prediction.user_id,
                        seeds = outcome.seeds_earned,
                        balance = new_balance,
                        "Prediction settled"
                    );
                    if level_after > level_before {
                        info!(
                            user_id = %prediction.user_id,
                            from = level_before,
                            to = level_after,
                            "User leveled up"
                        );
                    }
                }
                Ok(ApplyOutcome::AlreadyResolved) => {
                    // Lost the latch to a concurrent settlement; not an error.
                    debug!(prediction_id = %prediction.id, "Already resolved, skipping");
                }
                Ok(ApplyOutcome::UserMissing) => {
                    warn!(
                        prediction_id = %prediction.id,
                        user_id = %prediction.user_id,
                        "Owning user not found"
                    );
                    report.record_failure(
                        prediction.id.clone(),
                        format!("user {} not found", prediction.user_id),
                    );
                }
                Err(e) => {
                    warn!(prediction_id = %prediction.id, error = %e, "Settlement failed");
                    report.record_failure(prediction.id.clone(), e.to_string());
                }
            }
        }

        if report.resolved_count > 0 {
            if let (Some(region), Some(trigger)) = (&resolution.region, &self.ranking) {
                trigger.trigger(region);
            }
        }

        info!(
            decision_id,
            processed = report.processed,
            resolved = report.resolved_count,
            errors = report.error_count,
            "Decision settled"
        );
        Ok(report)
    }

    /// Sweep resolved decisions that still have outstanding predictions,
    /// bounded by `limit` decisions per call.
    pub async fn settle_all_resolved_decisions(&self, limit: usize) -> Result<SettlementReport> {
        let decision_ids = self.store.resolved_decisions_with_pending(limit)?;
        let mut report = SettlementReport::default();

        for decision_id in &decision_ids {
            match self.settle_decision(decision_id).await {
                Ok(decision_report) => report.absorb(decision_report),
                Err(e) => {
                    warn!(decision_id = %decision_id, error = %e, "Decision settlement failed");
                    report.record_failure(decision_id.clone(), e.to_string());
                }
            }
        }

        if !decision_ids.is_empty() {
            info!(
                decisions = decision_ids.len(),
                processed = report.processed,
                resolved = report.resolved_count,
                errors = report.error_count,
                "Settlement sweep complete"
            );
        }
        Ok(report)
    }
}

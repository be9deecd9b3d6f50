//! Pure scoring rules for settled predictions.
//!
//! No I/O, no clock, no randomness: the same prediction and resolution
//! always produce the same signed seed amount. Confidence is used as a
//! linear multiplier and is expected in [0,100]; the engine clamps before
//! calling, this function does not validate.

use serde::{Deserialize, Serialize};

use crate::models::Issue;

/// Base multiplier applied to every correct prediction.
const BASE_MULTIPLIER: f64 = 1.5;
/// Extra multiplier for an exact "works"/"fails" match.
const EXACT_BONUS: f64 = 1.5;
/// Extra multiplier for a correct "partial" call.
const PARTIAL_BONUS: f64 = 1.2;
/// Fraction of the stake lost on an incorrect prediction.
const LOSS_MULTIPLIER: f64 = 0.5;
/// Gains and losses never fall below one seed.
const MIN_SEEDS: i64 = 1;

/// Outcome of scoring one prediction against a resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// Signed seed delta: positive for a correct prediction, negative otherwise.
    pub seeds_earned: i64,
    pub correct: bool,
    /// Human-readable reason recorded on the ledger entry.
    pub reason: String,
}

/// Score one prediction against the decision's resolution.
pub fn settle(
    predicted: Issue,
    stake: i64,
    resolved: Issue,
    confidence: i64,
) -> SettlementOutcome {
    if predicted == resolved {
        let bonus = match resolved {
            Issue::Partial => PARTIAL_BONUS,
            Issue::Works | Issue::Fails => EXACT_BONUS,
        };
        let multiplier = BASE_MULTIPLIER * bonus * (confidence as f64 / 100.0);
        let seeds = ((stake as f64) * multiplier).round() as i64;
        SettlementOutcome {
            seeds_earned: seeds.max(MIN_SEEDS),
            correct: true,
            reason: format!(
                "Predicted '{}' correctly (confidence {}%)",
                predicted.as_str(),
                confidence
            ),
        }
    } else {
        let seeds = ((stake as f64) * LOSS_MULTIPLIER).round() as i64;
        SettlementOutcome {
            seeds_earned: -seeds.max(MIN_SEEDS),
            correct: false,
            reason: format!(
                "Predicted '{}' but decision resolved '{}'",
                predicted.as_str(),
                resolved.as_str()
            ),
        }
    }
}

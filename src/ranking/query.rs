//! Read-side leaderboard queries.
//!
//! Recomputes filter+sort+slice on every read instead of trusting the
//! cached per-user rank, so leaderboard displays can never be stale. The
//! cached rank is only for a user's own profile page.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::RankingEntry;
use crate::ranking::recalculator::{accuracy, compare_participants};
use crate::store::SettlementStore;

/// One region's leaderboard slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRanking {
    pub region: String,
    pub entries: Vec<RankingEntry>,
}

#[derive(Clone)]
pub struct RankingQuery {
    store: Arc<SettlementStore>,
}

impl RankingQuery {
    pub fn new(store: Arc<SettlementStore>) -> Self {
        Self { store }
    }

    /// Top `limit` participants of one region, ranked on the fly.
    pub fn region_ranking(&self, region: &str, limit: usize) -> Result<Vec<RankingEntry>> {
        let mut participants = self.store.region_participants(region)?;
        participants.sort_by(compare_participants);
        participants.truncate(limit);

        Ok(participants
            .iter()
            .enumerate()
            .map(|(i, user)| RankingEntry {
                rank: i as i64 + 1,
                user_id: user.id.clone(),
                accuracy: accuracy(user),
                correct_predictions: user.correct_predictions,
                total_predictions: user.total_predictions,
                level: user.level,
            })
            .collect())
    }

    /// Every active region with its top `limit_per_region` participants.
    pub fn all_regions_ranking(&self, limit_per_region: usize) -> Result<Vec<RegionRanking>> {
        let regions = self.store.distinct_regions()?;
        let mut rankings = Vec::with_capacity(regions.len());
        for region in regions {
            let entries = self.region_ranking(&region, limit_per_region)?;
            rankings.push(RegionRanking { region, entries });
        }
        Ok(rankings)
    }
}

//! Full recompute of one region's leaderboard.
//!
//! Ordering is deterministic: descending accuracy quantized to a small
//! tolerance, then descending raw correct count, then user id. Ranks are
//! dense (1..N over eligible participants) and persisted in a single
//! transaction. Recomputation is idempotent: the same inputs always
//! produce the same ranks, so concurrent recomputes are safe, just wasteful.

use anyhow::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::models::UserProfile;
use crate::store::SettlementStore;

/// Accuracies within this distance are treated as equal.
pub const ACCURACY_TOLERANCE: f64 = 0.01;

/// Prediction accuracy as a percentage.
pub fn accuracy(user: &UserProfile) -> f64 {
    if user.total_predictions == 0 {
        0.0
    } else {
        user.correct_predictions as f64 / user.total_predictions as f64 * 100.0
    }
}

/// Accuracy quantized to the tolerance grid. A pairwise |a - b| check is
/// not transitive and would make the sort depend on row scan order (and
/// trip the stdlib's total-order check); bucketing keeps near-equal
/// accuracies tied while giving a genuine total order.
fn accuracy_bucket(user: &UserProfile) -> i64 {
    (accuracy(user) / ACCURACY_TOLERANCE).round() as i64
}

/// Leaderboard ordering over eligible participants.
pub(crate) fn compare_participants(a: &UserProfile, b: &UserProfile) -> Ordering {
    accuracy_bucket(b)
        .cmp(&accuracy_bucket(a))
        .then_with(|| b.correct_predictions.cmp(&a.correct_predictions))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Clone)]
pub struct RankingRecalculator {
    store: Arc<SettlementStore>,
}

impl RankingRecalculator {
    pub fn new(store: Arc<SettlementStore>) -> Self {
        Self { store }
    }

    /// Recompute and persist dense ranks for one region.
    ///
    /// Returns the number of ranked participants.
    pub fn recalculate_region(&self, region: &str) -> Result<usize> {
        let mut participants = self.store.region_participants(region)?;
        participants.sort_by(compare_participants);

        let ranks: Vec<(String, i64)> = participants
            .iter()
            .enumerate()
            .map(|(i, user)| (user.id.clone(), i as i64 + 1))
            .collect();

        self.store.update_region_ranks(region, &ranks)?;
        info!(
            region,
            participants = ranks.len(),
            "Region ranking recalculated"
        );
        Ok(ranks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn participant(id: &str, correct: i64, total: i64) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            balance: 0,
            level: 1,
            seeds_to_next_level: 100,
            region: Some("north".to_string()),
            correct_predictions: correct,
            total_predictions: total,
            region_rank: None,
        }
    }

    fn store_with(users: &[UserProfile]) -> (Arc<SettlementStore>, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp db");
        let store = Arc::new(SettlementStore::new(file.path().to_str().unwrap()).unwrap());
        for user in users {
            store.insert_user(user).unwrap();
        }
        (store, file)
    }

    #[test]
    fn orders_by_accuracy_descending() {
        let mut users = vec![
            participant("low", 1, 4),   // 25%
            participant("high", 9, 10), // 90%
            participant("mid", 3, 6),   // 50%
        ];
        users.sort_by(compare_participants);
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["high", "mid", "low"]);
    }

    #[test]
    fn near_equal_accuracy_breaks_tie_on_raw_correct_count() {
        // Both at exactly 50%, but "veteran" earned it over more predictions.
        let mut users = vec![participant("rookie", 1, 2), participant("veteran", 10, 20)];
        users.sort_by(compare_participants);
        assert_eq!(users[0].id, "veteran");

        // Same accuracy, same correct count: user id keeps the order stable.
        let mut users = vec![participant("b", 5, 10), participant("a", 5, 10)];
        users.sort_by(compare_participants);
        assert_eq!(users[0].id, "a");
    }

    #[test]
    fn ranks_form_a_dense_permutation() {
        let users: Vec<UserProfile> = (0..8)
            .map(|i| participant(&format!("u{}", i), i, 10))
            .collect();
        let (store, _file) = store_with(&users);

        let recalc = RankingRecalculator::new(store.clone());
        let ranked = recalc.recalculate_region("north").unwrap();
        assert_eq!(ranked, 8);

        let mut seen: Vec<i64> = (0..8)
            .map(|i| {
                store
                    .get_user(&format!("u{}", i))
                    .unwrap()
                    .unwrap()
                    .region_rank
                    .expect("participant must be ranked")
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=8).collect::<Vec<i64>>());
    }

    #[test]
    fn recomputation_is_idempotent() {
        let users = vec![
            participant("a", 3, 4),
            participant("b", 1, 4),
            participant("c", 2, 4),
        ];
        let (store, _file) = store_with(&users);
        let recalc = RankingRecalculator::new(store.clone());

        recalc.recalculate_region("north").unwrap();
        let first: Vec<Option<i64>> = ["a", "b", "c"]
            .iter()
            .map(|id| store.get_user(id).unwrap().unwrap().region_rank)
            .collect();

        recalc.recalculate_region("north").unwrap();
        let second: Vec<Option<i64>> = ["a", "b", "c"]
            .iter()
            .map(|id| store.get_user(id).unwrap().unwrap().region_rank)
            .collect();

        assert_eq!(first, second);
        assert_eq!(first, vec![Some(1), Some(3), Some(2)]);
    }

    #[test]
    fn ranking_is_independent_of_row_order() {
        // Accuracies 50.000 / 50.006 / 50.012 straddle the tolerance so a
        // pairwise comparison would cycle (a beats b on correct count, b
        // beats c on correct count, c beats a on accuracy) and let the scan
        // order pick the winner. The quantized comparator must not.
        let a = participant("a", 5_000, 10_000);
        let b = participant("b", 4_167, 8_333);
        let c = participant("c", 4_166, 8_330);

        let forward = vec![a.clone(), b.clone(), c.clone()];
        let backward = vec![c, b, a];

        let mut ranks_by_order = Vec::new();
        for users in [forward, backward] {
            let (store, _file) = store_with(&users);
            RankingRecalculator::new(store.clone())
                .recalculate_region("north")
                .unwrap();
            let ranks: Vec<Option<i64>> = ["a", "b", "c"]
                .iter()
                .map(|id| store.get_user(id).unwrap().unwrap().region_rank)
                .collect();
            ranks_by_order.push(ranks);
        }

        assert_eq!(ranks_by_order[0], ranks_by_order[1]);
        // b and c share an accuracy bucket, so raw correct count splits them.
        assert_eq!(ranks_by_order[0], vec![Some(3), Some(1), Some(2)]);
    }

    #[test]
    fn comparator_is_a_total_order_on_near_equal_accuracies() {
        // Dense cluster of near-equal accuracies; a non-transitive
        // comparison here can panic the stdlib sort outright.
        let users: Vec<UserProfile> = (0..64)
            .map(|i| participant(&format!("u{:02}", i), 4_100 + i, 8_200 + i))
            .collect();

        let mut sorted = users.clone();
        sorted.sort_by(compare_participants);

        for pair in sorted.windows(2) {
            assert_ne!(
                compare_participants(&pair[0], &pair[1]),
                std::cmp::Ordering::Greater
            );
        }
    }

    #[test]
    fn empty_region_is_fine() {
        let (store, _file) = store_with(&[]);
        let recalc = RankingRecalculator::new(store);
        assert_eq!(recalc.recalculate_region("nowhere").unwrap(), 0);
    }
}

//! Experience level derived from cumulative seed balance.
//!
//! Quadratic bands: 0-100 seeds is level 1, 100-400 level 2, 400-900
//! level 3, and so on. Derived on every balance change, never cached.

use serde::{Deserialize, Serialize};

/// Seeds required to finish the first level band.
const LEVEL_BAND_BASE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: i64,
    pub seeds_to_next_level: i64,
    pub seeds_for_current_level: i64,
}

/// Derive level and progress from a cumulative balance.
///
/// Negative balances clamp to level 1 with a full band remaining.
pub fn level_for(total_seeds: i64) -> LevelInfo {
    if total_seeds < 0 {
        return LevelInfo {
            level: 1,
            seeds_to_next_level: LEVEL_BAND_BASE,
            seeds_for_current_level: 0,
        };
    }

    let level = ((total_seeds as f64 / LEVEL_BAND_BASE as f64).sqrt().floor() as i64) + 1;
    let seeds_for_current_level = (level - 1) * (level - 1) * LEVEL_BAND_BASE;
    let seeds_for_next_level = level * level * LEVEL_BAND_BASE;

    LevelInfo {
        level,
        seeds_to_next_level: (seeds_for_next_level - total_seeds).max(0),
        seeds_for_current_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges() {
        assert_eq!(level_for(0).level, 1);
        assert_eq!(level_for(99).level, 1);
        assert_eq!(level_for(100).level, 2);
        assert_eq!(level_for(399).level, 2);
        assert_eq!(level_for(400).level, 3);
        assert_eq!(level_for(900).level, 4);
    }

    #[test]
    fn worked_example_250_seeds() {
        let info = level_for(250);
        assert_eq!(info.level, 2);
        assert_eq!(info.seeds_for_current_level, 100);
        assert_eq!(info.seeds_to_next_level, 150);
    }

    #[test]
    fn negative_balance_clamps_to_level_one() {
        let info = level_for(-250);
        assert_eq!(info.level, 1);
        assert_eq!(info.seeds_to_next_level, 100);
        assert_eq!(info.seeds_for_current_level, 0);
    }

    #[test]
    fn monotone_non_decreasing() {
        let mut last = 0;
        for total in 0..=2_000 {
            let level = level_for(total).level;
            assert!(level >= last, "level dropped at total {}", total);
            last = level;
        }
    }

    #[test]
    fn progress_never_negative() {
        for total in [0, 100, 101, 399, 400, 899, 900, 10_000] {
            assert!(level_for(total).seeds_to_next_level >= 0);
        }
    }
}

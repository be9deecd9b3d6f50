//! Region leaderboards.
//!
//! Writes: a full recompute of one region's dense ranks, queued through a
//! debounced scheduler so bursty settlement does not trigger a recompute
//! per prediction. Reads: on-demand filter+sort that never trusts the
//! cached per-user rank.

pub mod query;
pub mod recalculator;
pub mod scheduler;

pub use query::{RankingQuery, RegionRanking};
pub use recalculator::RankingRecalculator;
pub use scheduler::{spawn_ranking_worker, RankingTrigger};

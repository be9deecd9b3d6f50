//! SeedStake Backend Library
//!
//! Settlement-and-ranking core for the seeds prediction platform: pure
//! scoring and leveling rules, the idempotent settlement engine, the
//! append-only ledger, and region leaderboards with debounced recompute.

pub mod api;
pub mod models;
pub mod ranking;
pub mod settlement;
pub mod store;

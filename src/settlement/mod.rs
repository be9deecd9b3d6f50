//! Settlement - converting resolved decisions into seed payouts
//!
//! This module handles:
//! 1. Pure scoring rules (payout/penalty per prediction)
//! 2. Pure leveling (experience level derived from cumulative balance)
//! 3. Orchestration: settle one decision, or sweep all resolved decisions

pub mod engine;
pub mod leveling;
pub mod scoring;

pub use engine::{MissingResolution, SettlementEngine, SettlementFailure, SettlementReport};
pub use leveling::{level_for, LevelInfo};
pub use scoring::{settle, SettlementOutcome};

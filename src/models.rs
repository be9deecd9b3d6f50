use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three categorical issues a decision can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issue {
    Works,
    Partial,
    Fails,
}

impl Issue {
    pub fn as_str(&self) -> &str {
        match self {
            Issue::Works => "works",
            Issue::Partial => "partial",
            Issue::Fails => "fails",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "works" => Some(Issue::Works),
            "partial" => Some(Issue::Partial),
            "fails" => Some(Issue::Fails),
            _ => None,
        }
    }
}

/// Authoritative outcome of a decision, supplied by the resolution subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub decision_id: String,
    pub issue: Issue,
    /// Resolution confidence in [0,100]; upstream is not trusted, the
    /// settlement engine clamps before scoring.
    pub confidence: i64,
    /// Region-competition tag, when the decision belongs to one.
    pub region: Option<String>,
}

/// A user's staked guess at a decision's eventual outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub user_id: String,
    pub decision_id: String,
    pub issue: Issue,
    pub stake: i64,
    pub resolved: bool,
    pub result: Option<Issue>,
    pub seeds_earned: Option<i64>,
}

/// Per-user aggregate state mutated by settlement and ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub balance: i64,
    pub level: i64,
    pub seeds_to_next_level: i64,
    /// Selected competition region, if the user joined one.
    pub region: Option<String>,
    pub correct_predictions: i64,
    pub total_predictions: i64,
    /// Display-only cached rank; leaderboard reads recompute instead.
    pub region_rank: Option<i64>,
}

/// Direction of a balance-affecting ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerDirection {
    Earned,
    Lost,
}

impl LedgerDirection {
    pub fn as_str(&self) -> &str {
        match self {
            LedgerDirection::Earned => "earned",
            LedgerDirection::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earned" => Some(LedgerDirection::Earned),
            "lost" => Some(LedgerDirection::Lost),
            _ => None,
        }
    }
}

/// Immutable audit record of one balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub direction: LedgerDirection,
    pub amount: i64,
    pub reason: String,
    pub prediction_id: String,
    pub level_before: i64,
    pub level_after: i64,
    pub created_at: DateTime<Utc>,
}

/// One row of a region leaderboard, computed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: i64,
    pub user_id: String,
    pub accuracy: f64,
    pub correct_predictions: i64,
    pub total_predictions: i64,
    pub level: i64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Seconds between background settle-all sweeps.
    pub settle_interval_secs: u64,
    /// Maximum decisions settled per sweep.
    pub settle_batch_limit: usize,
    /// Coalescing window for region recompute triggers.
    pub ranking_debounce_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./seedstake.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let settle_interval_secs = std::env::var("SETTLE_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let settle_batch_limit = std::env::var("SETTLE_BATCH_LIMIT")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);

        let ranking_debounce_ms = std::env::var("RANKING_DEBOUNCE_MS")
            .unwrap_or_else(|_| "250".to_string())
            .parse()
            .unwrap_or(250);

        Ok(Self {
            database_path,
            port,
            settle_interval_secs,
            settle_batch_limit,
            ranking_debounce_ms,
        })
    }
}

//! SQLite persistence layer for settlement and ranking.
//!
//! One connection behind a mutex, WAL mode for concurrent readers. All
//! settlement writes for a single prediction (resolved latch, balance
//! increment, level refresh, competition counters, ledger append) commit
//! as one transaction, so a crash can never leave a resolved prediction
//! without its balance and ledger effect.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Issue, LedgerDirection, LedgerEntry, Prediction, Resolution, UserProfile};
use crate::settlement::leveling::level_for;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

-- Decisions are owned by the resolution subsystem; this core only reads
-- them and is tolerant of rows appearing/resolving at any time.
CREATE TABLE IF NOT EXISTS decisions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    region TEXT,
    resolution_issue TEXT,
    resolution_confidence INTEGER,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS predictions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    decision_id TEXT NOT NULL,
    issue TEXT NOT NULL,
    stake INTEGER NOT NULL CHECK (stake > 0),
    resolved INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    seeds_earned INTEGER,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_predictions_decision
    ON predictions(decision_id, resolved);
CREATE INDEX IF NOT EXISTS idx_predictions_user
    ON predictions(user_id);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    seeds_to_next_level INTEGER NOT NULL DEFAULT 100,
    region TEXT,
    correct_predictions INTEGER NOT NULL DEFAULT 0,
    total_predictions INTEGER NOT NULL DEFAULT 0,
    region_rank INTEGER
);

CREATE INDEX IF NOT EXISTS idx_users_region
    ON users(region) WHERE region IS NOT NULL;

-- Append-only audit trail. Rows are never updated or deleted.
CREATE TABLE IF NOT EXISTS ledger (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount >= 1),
    reason TEXT NOT NULL,
    prediction_id TEXT NOT NULL,
    level_before INTEGER NOT NULL,
    level_after INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_user
    ON ledger(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_ledger_prediction
    ON ledger(prediction_id);
"#;

/// Result of one transactional settlement write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        level_before: i64,
        level_after: i64,
        new_balance: i64,
    },
    /// The latch was already flipped by a concurrent or earlier settlement.
    AlreadyResolved,
    /// No row for the owning user; the whole unit rolled back.
    UserMissing,
}

pub struct SettlementStore {
    conn: Arc<Mutex<Connection>>,
}

impl SettlementStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- collaborator seams (rows owned by other subsystems) ----

    pub fn insert_user(&self, user: &UserProfile) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, balance, level, seeds_to_next_level, region,
                                correct_predictions, total_predictions, region_rank)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id,
                user.balance,
                user.level,
                user.seeds_to_next_level,
                user.region,
                user.correct_predictions,
                user.total_predictions,
                user.region_rank,
            ],
        )?;
        Ok(())
    }

    pub fn insert_decision(&self, id: &str, title: &str, region: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO decisions (id, title, region) VALUES (?1, ?2, ?3)",
            params![id, title, region],
        )?;
        Ok(())
    }

    pub fn record_resolution(&self, decision_id: &str, issue: Issue, confidence: i64) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE decisions SET resolution_issue = ?1, resolution_confidence = ?2, resolved_at = ?3
             WHERE id = ?4",
            params![issue.as_str(), confidence, Utc::now().to_rfc3339(), decision_id],
        )?;
        anyhow::ensure!(updated == 1, "decision {} not found", decision_id);
        Ok(())
    }

    pub fn insert_prediction(&self, prediction: &Prediction) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO predictions (id, user_id, decision_id, issue, stake, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                prediction.id,
                prediction.user_id,
                prediction.decision_id,
                prediction.issue.as_str(),
                prediction.stake,
            ],
        )?;
        Ok(())
    }

    // ---- settlement reads ----

    pub fn get_resolution(&self, decision_id: &str) -> Result<Option<Resolution>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, resolution_issue, resolution_confidence, region
                 FROM decisions
                 WHERE id = ?1 AND resolution_issue IS NOT NULL",
                [decision_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, issue, confidence, region)) = row else {
            return Ok(None);
        };
        let issue = Issue::parse(&issue)
            .with_context(|| format!("decision {} has unknown resolution issue '{}'", id, issue))?;
        Ok(Some(Resolution {
            decision_id: id,
            issue,
            confidence,
            region,
        }))
    }

    pub fn unresolved_predictions(&self, decision_id: &str) -> Result<Vec<Prediction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, decision_id, issue, stake, resolved, result, seeds_earned
             FROM predictions
             WHERE decision_id = ?1 AND resolved = 0",
        )?;
        let predictions = stmt
            .query_map([decision_id], map_prediction_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(predictions)
    }

    pub fn get_prediction(&self, id: &str) -> Result<Option<Prediction>> {
        let conn = self.conn.lock();
        let prediction = conn
            .query_row(
                "SELECT id, user_id, decision_id, issue, stake, resolved, result, seeds_earned
                 FROM predictions WHERE id = ?1",
                [id],
                map_prediction_row,
            )
            .optional()?;
        Ok(prediction)
    }

    /// Resolved decisions that still have at least one unresolved prediction,
    /// oldest resolution first, bounded by `limit`.
    pub fn resolved_decisions_with_pending(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT d.id FROM decisions d
             WHERE d.resolution_issue IS NOT NULL
               AND EXISTS (SELECT 1 FROM predictions p
                           WHERE p.decision_id = d.id AND p.resolved = 0)
             ORDER BY d.resolved_at
             LIMIT ?1",
        )?;
        let ids = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    // ---- the transactional settlement unit ----

    /// Flip the resolved latch, apply the balance delta, refresh the level,
    /// bump competition counters, and append the ledger row — atomically.
    ///
    /// The latch flip is a conditional update: zero affected rows means some
    /// other settlement already won, and the whole unit becomes a no-op.
    pub fn apply_settlement(
        &self,
        prediction: &Prediction,
        result: Issue,
        seeds_earned: i64,
        correct: bool,
        reason: &str,
        in_competition: bool,
    ) -> Result<ApplyOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let flipped = tx.execute(
            "UPDATE predictions
             SET resolved = 1, result = ?1, seeds_earned = ?2, resolved_at = ?3
             WHERE id = ?4 AND resolved = 0",
            params![result.as_str(), seeds_earned, &now, prediction.id],
        )?;
        if flipped == 0 {
            return Ok(ApplyOutcome::AlreadyResolved);
        }

        let level_before: Option<i64> = tx
            .query_row(
                "SELECT level FROM users WHERE id = ?1",
                [prediction.user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(level_before) = level_before else {
            // Dropping the transaction rolls the latch back, so a scheduled
            // re-run retries this prediction once the user row exists.
            return Ok(ApplyOutcome::UserMissing);
        };

        // Increment server-side; never overwrite from a stale read.
        tx.execute(
            "UPDATE users SET balance = balance + ?1 WHERE id = ?2",
            params![seeds_earned, prediction.user_id],
        )?;
        let new_balance: i64 = tx.query_row(
            "SELECT balance FROM users WHERE id = ?1",
            [prediction.user_id.as_str()],
            |row| row.get(0),
        )?;

        let info = level_for(new_balance);
        tx.execute(
            "UPDATE users SET level = ?1, seeds_to_next_level = ?2 WHERE id = ?3",
            params![info.level, info.seeds_to_next_level, prediction.user_id],
        )?;

        if in_competition {
            tx.execute(
                "UPDATE users
                 SET total_predictions = total_predictions + 1,
                     correct_predictions = correct_predictions + ?1
                 WHERE id = ?2",
                params![correct as i64, prediction.user_id],
            )?;
        }

        let direction = if seeds_earned >= 0 {
            LedgerDirection::Earned
        } else {
            LedgerDirection::Lost
        };
        tx.execute(
            "INSERT INTO ledger (id, user_id, direction, amount, reason, prediction_id,
                                 level_before, level_after, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Uuid::new_v4().to_string(),
                prediction.user_id,
                direction.as_str(),
                seeds_earned.abs(),
                reason,
                prediction.id,
                level_before,
                info.level,
                &now,
            ],
        )?;

        tx.commit()?;
        Ok(ApplyOutcome::Applied {
            level_before,
            level_after: info.level,
            new_balance,
        })
    }

    // ---- user & ledger reads ----

    pub fn get_user(&self, id: &str) -> Result<Option<UserProfile>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT id, balance, level, seeds_to_next_level, region,
                        correct_predictions, total_predictions, region_rank
                 FROM users WHERE id = ?1",
                [id],
                map_user_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn ledger_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, direction, amount, reason, prediction_id,
                    level_before, level_after, created_at
             FROM ledger
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![user_id, limit as i64], map_ledger_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Resolved predictions without a matching ledger row. The settlement
    /// unit is transactional, so this is expected to always come back empty;
    /// it exists as a cheap audit for operators and tests.
    pub fn unledgered_resolved_predictions(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT p.id FROM predictions p
             WHERE p.resolved = 1
               AND NOT EXISTS (SELECT 1 FROM ledger l WHERE l.prediction_id = p.id)",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    // ---- ranking reads & writes ----

    /// Users eligible for a region leaderboard: selected that region and
    /// have at least one counted prediction.
    pub fn region_participants(&self, region: &str) -> Result<Vec<UserProfile>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, balance, level, seeds_to_next_level, region,
                    correct_predictions, total_predictions, region_rank
             FROM users
             WHERE region = ?1 AND total_predictions > 0",
        )?;
        let users = stmt
            .query_map([region], map_user_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn distinct_regions(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT region FROM users
             WHERE region IS NOT NULL AND total_predictions > 0
             ORDER BY region",
        )?;
        let regions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(regions)
    }

    /// Persist a full region recomputation in one transaction: ineligible
    /// users lose their cached rank, eligible users get their new one.
    pub fn update_region_ranks(&self, region: &str, ranks: &[(String, i64)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE users SET region_rank = NULL WHERE region = ?1",
            [region],
        )?;
        {
            let mut stmt =
                tx.prepare("UPDATE users SET region_rank = ?1 WHERE id = ?2 AND region = ?3")?;
            for (user_id, rank) in ranks {
                stmt.execute(params![rank, user_id, region])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn map_prediction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Prediction> {
    let issue: String = row.get(3)?;
    let result: Option<String> = row.get(6)?;
    Ok(Prediction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        decision_id: row.get(2)?,
        issue: parse_issue_col(3, &issue)?,
        stake: row.get(4)?,
        resolved: row.get::<_, i64>(5)? == 1,
        result: match result {
            Some(s) => Some(parse_issue_col(6, &s)?),
            None => None,
        },
        seeds_earned: row.get(7)?,
    })
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        balance: row.get(1)?,
        level: row.get(2)?,
        seeds_to_next_level: row.get(3)?,
        region: row.get(4)?,
        correct_predictions: row.get(5)?,
        total_predictions: row.get(6)?,
        region_rank: row.get(7)?,
    })
}

fn map_ledger_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let direction: String = row.get(2)?;
    let created_at: String = row.get(8)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        direction: LedgerDirection::parse(&direction).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown ledger direction '{}'", direction).into(),
            )
        })?,
        amount: row.get(3)?,
        reason: row.get(4)?,
        prediction_id: row.get(5)?,
        level_before: row.get(6)?,
        level_after: row.get(7)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?
            .with_timezone(&Utc),
    })
}

fn parse_issue_col(col: usize, s: &str) -> rusqlite::Result<Issue> {
    Issue::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown issue '{}'", s).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_store() -> (SettlementStore, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp db");
        let store = SettlementStore::new(file.path().to_str().unwrap()).expect("open store");
        (store, file)
    }

    fn test_user(id: &str, region: Option<&str>) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            balance: 0,
            level: 1,
            seeds_to_next_level: 100,
            region: region.map(|r| r.to_string()),
            correct_predictions: 0,
            total_predictions: 0,
            region_rank: None,
        }
    }

    fn test_prediction(id: &str, user_id: &str, decision_id: &str) -> Prediction {
        Prediction {
            id: id.to_string(),
            user_id: user_id.to_string(),
            decision_id: decision_id.to_string(),
            issue: Issue::Works,
            stake: 10,
            resolved: false,
            result: None,
            seeds_earned: None,
        }
    }

    #[test]
    fn resolution_absent_until_recorded() {
        let (store, _file) = test_store();
        store.insert_decision("d1", "Test decision", None).unwrap();
        assert!(store.get_resolution("d1").unwrap().is_none());

        store.record_resolution("d1", Issue::Works, 80).unwrap();
        let resolution = store.get_resolution("d1").unwrap().unwrap();
        assert_eq!(resolution.issue, Issue::Works);
        assert_eq!(resolution.confidence, 80);
        assert_eq!(resolution.region, None);
    }

    #[test]
    fn latch_rejects_second_settlement() {
        let (store, _file) = test_store();
        store.insert_user(&test_user("u1", None)).unwrap();
        store.insert_decision("d1", "Test", None).unwrap();
        let p = test_prediction("p1", "u1", "d1");
        store.insert_prediction(&p).unwrap();

        let first = store
            .apply_settlement(&p, Issue::Works, 18, true, "correct", false)
            .unwrap();
        assert!(matches!(first, ApplyOutcome::Applied { .. }));

        let second = store
            .apply_settlement(&p, Issue::Works, 18, true, "correct", false)
            .unwrap();
        assert_eq!(second, ApplyOutcome::AlreadyResolved);

        // One balance mutation, one ledger row.
        let user = store.get_user("u1").unwrap().unwrap();
        assert_eq!(user.balance, 18);
        assert_eq!(store.ledger_for_user("u1", 10).unwrap().len(), 1);
    }

    #[test]
    fn missing_user_rolls_back_the_latch() {
        let (store, _file) = test_store();
        store.insert_decision("d1", "Test", None).unwrap();
        let p = test_prediction("p1", "ghost", "d1");
        store.insert_prediction(&p).unwrap();

        let outcome = store
            .apply_settlement(&p, Issue::Works, 18, true, "correct", false)
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::UserMissing);

        // Latch untouched: a later re-run can retry this prediction.
        let stored = store.get_prediction("p1").unwrap().unwrap();
        assert!(!stored.resolved);
        assert!(store.unledgered_resolved_predictions().unwrap().is_empty());
    }

    #[test]
    fn settlement_writes_matching_ledger_entry() {
        let (store, _file) = test_store();
        store.insert_user(&test_user("u1", Some("north"))).unwrap();
        store.insert_decision("d1", "Test", Some("north")).unwrap();
        let p = test_prediction("p1", "u1", "d1");
        store.insert_prediction(&p).unwrap();

        store
            .apply_settlement(&p, Issue::Fails, -5, false, "missed it", true)
            .unwrap();

        let entries = store.ledger_for_user("u1", 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, LedgerDirection::Lost);
        assert_eq!(entries[0].amount, 5);
        assert_eq!(entries[0].prediction_id, "p1");
        assert_eq!(entries[0].level_before, 1);

        let user = store.get_user("u1").unwrap().unwrap();
        assert_eq!(user.balance, -5);
        assert_eq!(user.total_predictions, 1);
        assert_eq!(user.correct_predictions, 0);

        assert!(store.unledgered_resolved_predictions().unwrap().is_empty());
    }

    #[test]
    fn negative_balance_clamps_level() {
        let (store, _file) = test_store();
        store.insert_user(&test_user("u1", None)).unwrap();
        store.insert_decision("d1", "Test", None).unwrap();
        let p = test_prediction("p1", "u1", "d1");
        store.insert_prediction(&p).unwrap();

        store
            .apply_settlement(&p, Issue::Fails, -5, false, "missed", false)
            .unwrap();

        let user = store.get_user("u1").unwrap().unwrap();
        assert_eq!(user.level, 1);
        assert_eq!(user.seeds_to_next_level, 100);
    }

    #[test]
    fn pending_decision_listing_is_bounded_and_skips_settled() {
        let (store, _file) = test_store();
        store.insert_user(&test_user("u1", None)).unwrap();
        for i in 0..3 {
            let d = format!("d{}", i);
            store.insert_decision(&d, "Test", None).unwrap();
            store.record_resolution(&d, Issue::Works, 100).unwrap();
            let p = test_prediction(&format!("p{}", i), "u1", &d);
            store.insert_prediction(&p).unwrap();
        }

        assert_eq!(store.resolved_decisions_with_pending(2).unwrap().len(), 2);
        assert_eq!(store.resolved_decisions_with_pending(10).unwrap().len(), 3);

        // Settling d0's only prediction removes it from the pending list.
        let p0 = store.get_prediction("p0").unwrap().unwrap();
        store
            .apply_settlement(&p0, Issue::Works, 22, true, "correct", false)
            .unwrap();
        let pending = store.resolved_decisions_with_pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(!pending.contains(&"d0".to_string()));
    }

    #[test]
    fn region_rank_updates_clear_stale_ranks() {
        let (store, _file) = test_store();
        let mut u1 = test_user("u1", Some("north"));
        u1.total_predictions = 4;
        u1.correct_predictions = 3;
        u1.region_rank = Some(7);
        store.insert_user(&u1).unwrap();

        let mut u2 = test_user("u2", Some("north"));
        u2.total_predictions = 2;
        u2.correct_predictions = 2;
        store.insert_user(&u2).unwrap();

        // u3 selected the region but has no counted predictions.
        let mut u3 = test_user("u3", Some("north"));
        u3.region_rank = Some(1);
        store.insert_user(&u3).unwrap();

        store
            .update_region_ranks(
                "north",
                &[("u2".to_string(), 1), ("u1".to_string(), 2)],
            )
            .unwrap();

        assert_eq!(store.get_user("u2").unwrap().unwrap().region_rank, Some(1));
        assert_eq!(store.get_user("u1").unwrap().unwrap().region_rank, Some(2));
        assert_eq!(store.get_user("u3").unwrap().unwrap().region_rank, None);

        let participants = store.region_participants("north").unwrap();
        assert_eq!(participants.len(), 2);
    }
}

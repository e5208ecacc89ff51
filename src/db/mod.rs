use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use thiserror::Error;

use crate::decision_engine::Verdict;
use crate::error::RuleLoadError;
use crate::learning::{LearningOutcome, LearningStatus};
use crate::rules::loader::RuleRow;
use crate::rules::{Rule, RuleDefinition};

/// Verdicts are written once and never replaced
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Verdict for race {0} is already recorded")]
pub struct VerdictAlreadyRecorded(pub String);

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database connection")?;

        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .context("Failed to enable WAL mode")?;
        }

        let mut db = Self { conn };
        db.initialize_schema()?;

        info!("✅ Database initialized successfully");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let mut db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn initialize_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            -- Evidence-tracked rules
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                conditions TEXT NOT NULL,
                effect TEXT NOT NULL,
                alpha REAL NOT NULL,
                beta REAL NOT NULL,
                evidence_count INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );

            -- One immutable verdict per race
            CREATE TABLE IF NOT EXISTS verdicts (
                record_id TEXT NOT NULL UNIQUE,
                race_id TEXT PRIMARY KEY,
                chassis TEXT NOT NULL,
                top_selection TEXT,
                win_suppressed INTEGER NOT NULL,
                adversarial_risk INTEGER NOT NULL,
                reason TEXT NOT NULL,
                decided_at INTEGER NOT NULL,
                body TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            -- One learning outcome per race
            CREATE TABLE IF NOT EXISTS learning_outcomes (
                race_id TEXT PRIMARY KEY,
                status TEXT CHECK(status IN ('COMMITTED', 'QUARANTINED', 'REJECTED')) NOT NULL,
                reason TEXT NOT NULL,
                updates TEXT NOT NULL,
                settled_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_verdicts_chassis ON verdicts(chassis, decided_at);
            CREATE INDEX IF NOT EXISTS idx_outcomes_status ON learning_outcomes(status);
            "#,
            )
            .context("Failed to initialize database schema")?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    pub fn upsert_rule(&mut self, rule: &RuleDefinition) -> Result<()> {
        let row = RuleRow::from_definition(rule)?;
        self.conn
            .execute(
                r#"
            INSERT INTO rules (id, name, conditions, effect, alpha, beta, evidence_count, active, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                conditions = excluded.conditions,
                effect = excluded.effect,
                alpha = excluded.alpha,
                beta = excluded.beta,
                evidence_count = excluded.evidence_count,
                active = excluded.active,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
                params![
                    row.id,
                    row.name,
                    row.conditions_json,
                    row.effect_json,
                    row.alpha,
                    row.beta,
                    row.evidence_count,
                    row.active,
                    row.version,
                    Utc::now().timestamp(),
                ],
            )
            .with_context(|| format!("Failed to upsert rule {}", rule.id))?;
        Ok(())
    }

    /// Persist a set of rules in one transaction
    pub fn save_rules<'a, I>(&mut self, rules: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Rule>,
    {
        self.conn.execute_batch("BEGIN")?;
        let mut saved = 0;
        for rule in rules {
            if let Err(e) = self.upsert_rule(&rule.to_definition()) {
                self.conn.execute_batch("ROLLBACK")?;
                return Err(e);
            }
            saved += 1;
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(saved)
    }

    pub fn rule_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Stored rules, with rows whose JSON no longer parses reported separately
    pub fn load_rules(&self) -> Result<(Vec<RuleDefinition>, Vec<RuleLoadError>)> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, conditions, effect, alpha, beta, evidence_count, active, version FROM rules ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(RuleRow {
                id: row.get(0)?,
                name: row.get(1)?,
                conditions_json: row.get(2)?,
                effect_json: row.get(3)?,
                alpha: row.get(4)?,
                beta: row.get(5)?,
                evidence_count: row.get(6)?,
                active: row.get(7)?,
                version: row.get(8)?,
            })
        })?;

        let mut definitions = Vec::new();
        let mut errors = Vec::new();
        for row in rows {
            match row?.into_definition() {
                Ok(def) => definitions.push(def),
                Err(e) => errors.push(e),
            }
        }
        Ok((definitions, errors))
    }

    // ------------------------------------------------------------------
    // Verdicts
    // ------------------------------------------------------------------

    /// Insert-only; a second verdict for the same race fails with `VerdictAlreadyRecorded`
    pub fn insert_verdict(&mut self, verdict: &Verdict) -> Result<String> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(verdict).context("Failed to serialize verdict")?;

        let inserted = self.conn.execute(
            r#"
            INSERT INTO verdicts (
                record_id, race_id, chassis, top_selection, win_suppressed,
                adversarial_risk, reason, decided_at, body, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record_id,
                verdict.race_id,
                verdict.chassis.as_str(),
                verdict.top_selection,
                verdict.win_suppressed,
                verdict.adversarial_risk,
                verdict.reason,
                verdict.decided_at.timestamp(),
                body,
                Utc::now().timestamp(),
            ],
        );

        match inserted {
            Ok(_) => Ok(record_id),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(VerdictAlreadyRecorded(verdict.race_id.clone()).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to insert verdict for {}", verdict.race_id)),
        }
    }

    pub fn get_verdict(&self, race_id: &str) -> Result<Option<Verdict>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM verdicts WHERE race_id = ?1", params![race_id], |row| row.get(0))
            .optional()?;

        body.map(|b| serde_json::from_str(&b).with_context(|| format!("Corrupt verdict record for {}", race_id)))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Learning outcomes
    // ------------------------------------------------------------------

    pub fn insert_learning_outcome(&mut self, outcome: &LearningOutcome) -> Result<()> {
        let updates = serde_json::to_string(&outcome.updates).context("Failed to serialize evidence updates")?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO learning_outcomes (race_id, status, reason, updates, settled_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                outcome.race_id,
                outcome.status.as_str(),
                outcome.reason,
                updates,
                Utc::now().timestamp(),
            ],
        )?;
        if inserted == 0 {
            bail!("Learning outcome for race {} is already recorded", outcome.race_id);
        }
        Ok(())
    }

    /// Outcome row plus the rules it touched, committed together
    pub fn record_settlement<'a, I>(&mut self, outcome: &LearningOutcome, rules: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Rule>,
    {
        self.conn.execute_batch("BEGIN")?;
        let written = self.insert_learning_outcome(outcome).and_then(|()| {
            let mut saved = 0;
            for rule in rules {
                self.upsert_rule(&rule.to_definition())?;
                saved += 1;
            }
            Ok(saved)
        });
        match written {
            Ok(saved) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(saved)
            }
            Err(e) => {
                self.conn.execute_batch("ROLLBACK")?;
                Err(e).with_context(|| format!("Failed to record settlement for {}", outcome.race_id))
            }
        }
    }

    pub fn load_learning_outcomes(&self) -> Result<Vec<LearningOutcome>> {
        let mut stmt = self
            .conn
            .prepare("SELECT race_id, status, reason, updates FROM learning_outcomes ORDER BY race_id")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut outcomes = Vec::new();
        for row in rows {
            let (race_id, status, reason, updates) = row?;
            let status: LearningStatus = status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Corrupt learning outcome for {}", race_id))?;
            let updates = serde_json::from_str(&updates)
                .with_context(|| format!("Corrupt evidence updates for {}", race_id))?;
            outcomes.push(LearningOutcome { race_id, status, reason, updates });
        }
        Ok(outcomes)
    }
}

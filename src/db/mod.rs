pub mod schema;

use alloy_primitives::{Address, hex};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::core::Assessment;

/// A persisted assessment from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: i64,
    pub token: String,
    pub chain_id: u64,
    pub action: String,
    pub score: u32,
    pub level: String,
    pub max_score: u32,
    pub critical_override: Option<String>,
    pub rules_json: String,
    pub explanation: Option<String>,
    pub created_at: String,
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    /// Cached raw signals no older than `ttl` at `now`.
    pub fn cached_signals(
        &self,
        token: Address,
        chain_id: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.cached_signals(token, chain_id, ttl, now)
    }

    /// Cache raw signals, replacing any previous entry.
    pub fn cache_signals(
        &self,
        token: Address,
        chain_id: u64,
        raw: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.cache_signals(token, chain_id, raw, fetched_at)
    }

    /// Drop cache entries fetched before `cutoff`.
    pub fn prune_signal_cache(&self, cutoff: DateTime<Utc>) -> Result<usize, rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.prune_signal_cache(cutoff)
    }

    /// Store an assessment for history.
    pub fn store_assessment(&self, assessment: &Assessment) -> Result<i64, rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.store_assessment(assessment)
    }

    /// Get recent assessments ordered by time.
    pub fn recent_assessments(&self, limit: usize) -> Result<Vec<AssessmentRecord>, rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.recent_assessments(limit)
    }

    /// Get recent assessments of one token, any chain.
    pub fn assessments_for_token(
        &self,
        token: Address,
        limit: usize,
    ) -> Result<Vec<AssessmentRecord>, rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.assessments_for_token(token, limit)
    }

    /// Get total assessment count.
    pub fn assessment_count(&self) -> Result<usize, rusqlite::Error> {
        let db = self.inner.lock().unwrap();
        db.assessment_count()
    }
}

/// Tokens are keyed by lowercase `0x` hex.
fn token_key(token: Address) -> String {
    hex::encode_prefixed(token)
}

const ASSESSMENT_COLUMNS: &str = "id, token, chain_id, action, score, level, max_score, critical_override, rules_json, explanation, created_at";

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn cached_signals(
        &self,
        token: Address,
        chain_id: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, rusqlite::Error> {
        let cutoff = now
            .checked_sub_signed(ttl)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN);
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT raw_json FROM signal_cache WHERE token = ?1 AND chain_id = ?2 AND fetched_at > ?3",
                rusqlite::params![token_key(token), chain_id as i64, cutoff],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|text| match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("corrupt signal cache entry for {token}: {e}");
                None
            }
        }))
    }

    pub fn cache_signals(
        &self,
        token: Address,
        chain_id: u64,
        raw: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO signal_cache (token, chain_id, raw_json, fetched_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                token_key(token),
                chain_id as i64,
                raw.to_string(),
                fetched_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn prune_signal_cache(&self, cutoff: DateTime<Utc>) -> Result<usize, rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM signal_cache WHERE fetched_at < ?1",
            rusqlite::params![cutoff.timestamp_millis()],
        )
    }

    pub fn store_assessment(&self, a: &Assessment) -> Result<i64, rusqlite::Error> {
        let rules_json = serde_json::to_string(&a.rules)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let explanation = a.explanation.as_ref().map(|e| e.summary.as_str());
        self.conn.execute(
            "INSERT INTO assessments (token, chain_id, action, score, level, max_score, critical_override, rules_json, explanation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                token_key(a.token_address),
                a.chain_id as i64,
                a.action_type.as_str(),
                a.score.score,
                a.score.level.as_str(),
                a.score.max_score,
                a.score.critical_override.map(|c| c.as_str()),
                rules_json,
                explanation,
                a.assessed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn row_to_assessment(row: &rusqlite::Row) -> rusqlite::Result<AssessmentRecord> {
        Ok(AssessmentRecord {
            id: row.get(0)?,
            token: row.get(1)?,
            chain_id: row.get::<_, i64>(2)? as u64,
            action: row.get(3)?,
            score: row.get(4)?,
            level: row.get(5)?,
            max_score: row.get(6)?,
            critical_override: row.get(7)?,
            rules_json: row.get(8)?,
            explanation: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    pub fn recent_assessments(&self, limit: usize) -> Result<Vec<AssessmentRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM assessments ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], Self::row_to_assessment)?;
        rows.collect()
    }

    pub fn assessments_for_token(
        &self,
        token: Address,
        limit: usize,
    ) -> Result<Vec<AssessmentRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE token = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![token_key(token), limit as i64],
            Self::row_to_assessment,
        )?;
        rows.collect()
    }

    pub fn assessment_count(&self) -> Result<usize, rusqlite::Error> {
        self.conn.query_row("SELECT COUNT(*) FROM assessments", [], |row| {
            row.get::<_, i64>(0).map(|c| c as usize)
        })
    }
}

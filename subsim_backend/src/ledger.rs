use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::content::ThingRef;
use crate::reply_logic::ScoredItem;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Seen and scored, not yet routed.
    Pending,
    /// Prompt built and waiting for generation.
    Queued,
    Skipped,
    /// Generated text failed extraction or screening.
    Rejected,
    Responded,
}

impl RecordStatus {
    fn as_db_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Queued => "queued",
            RecordStatus::Skipped => "skipped",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Responded => "responded",
        }
    }

    fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => RecordStatus::Queued,
            "skipped" => RecordStatus::Skipped,
            "rejected" => RecordStatus::Rejected,
            "responded" => RecordStatus::Responded,
            _ => RecordStatus::Pending,
        }
    }
}

/// What one bot decided and did about one piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub responding_bot: String,
    pub thing: ThingRef,
    pub author: Option<String>,
    pub subreddit: String,
    pub reply_probability: f64,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl ReplyRecord {
    pub fn from_scored(responding_bot: &str, scored: &ScoredItem) -> Self {
        let now = Utc::now();
        Self {
            responding_bot: responding_bot.to_string(),
            thing: scored.item.thing_ref(),
            author: scored.item.author.clone(),
            subreddit: scored.item.subreddit.clone(),
            reply_probability: scored.score.score,
            prompt: None,
            response: None,
            status: RecordStatus::Pending,
            created_at: now,
            updated_at: now,
            responded_at: None,
        }
    }
}

const RECORD_COLUMNS: &str = "responding_bot, thing_id, author, subreddit, reply_probability, \
     prompt, response, status, created_at, updated_at, responded_at";

fn parse_time(index: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ReplyRecord> {
    let fullname: String = row.get(1)?;
    let thing = ThingRef::parse_fullname(&fullname).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("malformed fullname {}", fullname).into(),
        )
    })?;
    let status: String = row.get(7)?;

    Ok(ReplyRecord {
        responding_bot: row.get(0)?,
        thing,
        author: row.get(2)?,
        subreddit: row.get(3)?,
        reply_probability: row.get(4)?,
        prompt: row.get(5)?,
        response: row.get(6)?,
        status: RecordStatus::from_db(&status),
        created_at: parse_time(8, row.get(8)?)?,
        updated_at: parse_time(9, row.get(9)?)?,
        responded_at: row
            .get::<_, Option<String>>(10)?
            .map(|raw| parse_time(10, raw))
            .transpose()?,
    })
}

/// Per-bot record of every item considered, so nothing is answered twice.
pub struct ReplyLedger {
    conn: Mutex<Connection>,
}

impl ReplyLedger {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Ledger lock poisoned: {}", e))
    }

    /// Create or open the ledger
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    pub fn in_memory() -> Result<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS reply_records (
                responding_bot TEXT NOT NULL,
                thing_id TEXT NOT NULL,
                input_kind TEXT NOT NULL,
                author TEXT,
                subreddit TEXT NOT NULL,
                reply_probability REAL NOT NULL,
                prompt TEXT,
                response TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                responded_at TEXT,
                PRIMARY KEY (responding_bot, thing_id)
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reply_records_bot_status ON reply_records(responding_bot, status)",
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS bot_state (
                responding_bot TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (responding_bot, key)
            )"#,
            [],
        )?;

        Ok(())
    }

    /// Insert a record unless the bot already has one for the same item.
    /// Returns whether a row was written.
    pub fn insert_if_absent(&self, record: &ReplyRecord) -> Result<bool> {
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO reply_records (responding_bot, thing_id, input_kind, author, subreddit,
                 reply_probability, prompt, response, status, created_at, updated_at, responded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.responding_bot,
                record.thing.fullname(),
                record.thing.kind.as_str(),
                record.author,
                record.subreddit,
                record.reply_probability,
                record.prompt,
                record.response,
                record.status.as_db_str(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.responded_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn contains(&self, responding_bot: &str, thing: &ThingRef) -> Result<bool> {
        Ok(self.get(responding_bot, thing)?.is_some())
    }

    pub fn get(&self, responding_bot: &str, thing: &ThingRef) -> Result<Option<ReplyRecord>> {
        let conn = self.lock_conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM reply_records WHERE responding_bot = ?1 AND thing_id = ?2",
                    RECORD_COLUMNS
                ),
                params![responding_bot, thing.fullname()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn set_prompt(&self, responding_bot: &str, thing: &ThingRef, prompt: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE reply_records SET prompt = ?1, updated_at = ?2
             WHERE responding_bot = ?3 AND thing_id = ?4",
            params![prompt, Utc::now().to_rfc3339(), responding_bot, thing.fullname()],
        )?;
        Ok(())
    }

    pub fn set_status(&self, responding_bot: &str, thing: &ThingRef, status: RecordStatus) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE reply_records SET status = ?1, updated_at = ?2
             WHERE responding_bot = ?3 AND thing_id = ?4",
            params![
                status.as_db_str(),
                Utc::now().to_rfc3339(),
                responding_bot,
                thing.fullname()
            ],
        )?;
        Ok(())
    }

    pub fn mark_responded(&self, responding_bot: &str, thing: &ThingRef, response: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE reply_records SET status = ?1, response = ?2, responded_at = ?3, updated_at = ?3
             WHERE responding_bot = ?4 AND thing_id = ?5",
            params![
                RecordStatus::Responded.as_db_str(),
                response,
                now,
                responding_bot,
                thing.fullname()
            ],
        )?;
        Ok(())
    }

    /// Records with a prompt still waiting for generation, oldest first.
    pub fn pending_for_bot(&self, responding_bot: &str, limit: usize) -> Result<Vec<ReplyRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reply_records
             WHERE responding_bot = ?1 AND status = ?2 AND prompt IS NOT NULL
             ORDER BY reply_probability DESC, created_at ASC
             LIMIT ?3",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(
                params![responding_bot, RecordStatus::Queued.as_db_str(), limit as i64],
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn count_by_status(&self, responding_bot: &str, status: RecordStatus) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reply_records WHERE responding_bot = ?1 AND status = ?2",
            params![responding_bot, status.as_db_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get a per-bot state value
    pub fn get_state(&self, responding_bot: &str, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT value FROM bot_state WHERE responding_bot = ?1 AND key = ?2",
            params![responding_bot, key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a per-bot state value
    pub fn set_state(&self, responding_bot: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO bot_state (responding_bot, key, value) VALUES (?1, ?2, ?3)",
            params![responding_bot, key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::thread_store::fixtures::*;
    use crate::reply_logic::{ReplyScore, Verdict};
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("subsim_{}_{}.db", name, uuid::Uuid::new_v4()));
        path
    }

    fn scored(id: &str, score: f64) -> ScoredItem {
        ScoredItem {
            item: submission(id, "op", Utc::now()),
            score: ReplyScore {
                score,
                verdict: Verdict::Scored,
            },
        }
    }

    #[test]
    fn insert_is_idempotent_per_bot() {
        let path = temp_db_path("insert_idempotent");
        let ledger = ReplyLedger::new(&path).expect("ledger init");
        let record = ReplyRecord::from_scored("BotA", &scored("s1", 42.0));

        assert!(ledger.insert_if_absent(&record).expect("first insert"));
        assert!(!ledger.insert_if_absent(&record).expect("second insert"));

        let other_bot = ReplyRecord::from_scored("BotB", &scored("s1", 10.0));
        assert!(ledger.insert_if_absent(&other_bot).expect("other bot insert"));

        let stored = ledger
            .get("BotA", &ThingRef::submission("s1"))
            .expect("get")
            .expect("record exists");
        assert_eq!(stored.reply_probability, 42.0);
        assert_eq!(stored.status, RecordStatus::Pending);
        assert_eq!(stored.author.as_deref(), Some("op"));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn lifecycle_updates_status_prompt_and_response() {
        let ledger = ReplyLedger::in_memory().expect("ledger init");
        let thing = ThingRef::submission("s1");
        ledger
            .insert_if_absent(&ReplyRecord::from_scored("BotA", &scored("s1", 80.0)))
            .expect("insert");

        ledger.set_prompt("BotA", &thing, "<|sor|>").expect("set prompt");
        ledger
            .set_status("BotA", &thing, RecordStatus::Queued)
            .expect("queue");
        assert_eq!(
            ledger.count_by_status("BotA", RecordStatus::Queued).expect("count"),
            1
        );

        ledger
            .mark_responded("BotA", &thing, "hello")
            .expect("mark responded");
        let stored = ledger.get("BotA", &thing).expect("get").expect("record");
        assert_eq!(stored.status, RecordStatus::Responded);
        assert_eq!(stored.prompt.as_deref(), Some("<|sor|>"));
        assert_eq!(stored.response.as_deref(), Some("hello"));
        assert!(stored.responded_at.is_some());
        assert!(ledger.get("BotA", &ThingRef::comment("none")).expect("get").is_none());
    }

    #[test]
    fn pending_lists_queued_prompts_by_score() {
        let ledger = ReplyLedger::in_memory().expect("ledger init");
        for (id, score) in [("low", 10.0), ("high", 90.0), ("skipped", 50.0), ("bare", 70.0)] {
            ledger
                .insert_if_absent(&ReplyRecord::from_scored("BotA", &scored(id, score)))
                .expect("insert");
        }
        for id in ["low", "high"] {
            let thing = ThingRef::submission(id);
            ledger.set_prompt("BotA", &thing, "prompt").expect("prompt");
            ledger
                .set_status("BotA", &thing, RecordStatus::Queued)
                .expect("queue");
        }
        ledger
            .set_status("BotA", &ThingRef::submission("skipped"), RecordStatus::Skipped)
            .expect("skip");
        ledger
            .set_status("BotA", &ThingRef::submission("bare"), RecordStatus::Queued)
            .expect("queue without prompt");

        let pending = ledger.pending_for_bot("BotA", 10).expect("pending");
        let ids: Vec<&str> = pending.iter().map(|r| r.thing.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
        assert!(ledger.pending_for_bot("BotB", 10).expect("pending").is_empty());
    }

    #[test]
    fn state_is_scoped_per_bot() {
        let ledger = ReplyLedger::in_memory().expect("ledger init");
        assert_eq!(ledger.get_state("BotA", "last_submission_at").expect("get"), None);
        ledger
            .set_state("BotA", "last_submission_at", "2024-01-01T00:00:00Z")
            .expect("set");
        assert_eq!(
            ledger.get_state("BotA", "last_submission_at").expect("get").as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(ledger.get_state("BotB", "last_submission_at").expect("get"), None);
    }
}

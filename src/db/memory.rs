//! Memory repository for long-term memory storage
//!
//! An append-only log of typed records used to give the compute service
//! longer-horizon context across turns. Retrieval is a deliberately simple
//! substring match ordered by recency; callers must not assume relevance
//! ranking.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Memory record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Per-turn conversation summaries, subject to the retention sweep
    Conversation,
    /// Facts about the user or their portfolio of interests
    Fact,
    /// Insights extracted from completed research
    Insight,
    /// Ingested document references
    Document,
}

impl MemoryKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Fact => "fact",
            Self::Insight => "insight",
            Self::Document => "document",
        }
    }

    fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "fact" => Some(Self::Fact),
            "insight" => Some(Self::Insight),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable memory record
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub thread_id: Option<String>,
    pub kind: MemoryKind,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Memory repository for database operations
#[derive(Clone)]
pub struct MemoryRepo {
    pool: DbPool,
}

impl MemoryRepo {
    /// Create a new memory repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a new memory record.
    ///
    /// Unlike the scratch cache, write failures here propagate: a durable
    /// memory the caller believes was saved must actually be saved.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn record(
        &self,
        user_id: &str,
        content: &str,
        kind: MemoryKind,
        thread_id: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<MemoryRecord> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = format!("mem_{}", Uuid::new_v4());
        let now = Utc::now();
        let metadata_json = metadata.map(serde_json::Value::to_string);

        conn.execute(
            "INSERT INTO memory_records (id, user_id, thread_id, kind, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                user_id,
                thread_id,
                kind.as_str(),
                content,
                metadata_json,
                now.to_rfc3339()
            ],
        )?;

        Ok(MemoryRecord {
            id,
            user_id: user_id.to_string(),
            thread_id: thread_id.map(String::from),
            kind,
            content: content.to_string(),
            metadata: metadata.cloned(),
            created_at: now,
        })
    }

    /// Search memory records by content substring (case-insensitive),
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(
            "SELECT id, user_id, thread_id, kind, content, metadata, created_at
             FROM memory_records
             WHERE user_id = ?1 AND content LIKE ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let records = stmt
            .query_map(rusqlite::params![user_id, &pattern, limit as i64], row_to_record)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(records)
    }

    /// Conversation-kind records for a thread, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn conversation_memory(&self, thread_id: &str) -> Result<Vec<MemoryRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, thread_id, kind, content, metadata, created_at
             FROM memory_records
             WHERE thread_id = ?1 AND kind = 'conversation'
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let records = stmt
            .query_map([thread_id], row_to_record)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(records)
    }

    /// Delete conversation-kind records strictly older than the horizon.
    ///
    /// Only rows matched by kind and timestamp are touched, so the sweep
    /// is idempotent and safe to run concurrently with reads and writes.
    /// Other kinds are retained indefinitely.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn sweep(&self, horizon_days: u32) -> Result<usize> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let cutoff = (Utc::now() - Duration::days(i64::from(horizon_days))).to_rfc3339();
        let deleted = conn.execute(
            "DELETE FROM memory_records WHERE kind = 'conversation' AND created_at < ?1",
            [&cutoff],
        )?;

        if deleted > 0 {
            tracing::info!(count = deleted, horizon_days, "swept conversation memory");
        }

        Ok(deleted)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    Ok(MemoryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        thread_id: row.get(2)?,
        kind: MemoryKind::from_str_value(&row.get::<_, String>(3)?)
            .unwrap_or(MemoryKind::Conversation),
        content: row.get(4)?,
        metadata: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
    })
}

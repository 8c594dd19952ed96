//! Conversation repository: threads, messages, and source citations
//!
//! The relay orchestrator never touches rows directly; every create/read
//! goes through [`ConversationRepo`]. Messages are immutable once written:
//! a failed turn is recorded as an assistant message whose metadata marks
//! the error, never by mutating an existing row.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A conversation thread owned by one user
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One turn (user or assistant) within a thread
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Opaque reasoning trace from the compute service; round-tripped, never interpreted
    pub thinking_trace: Option<serde_json::Value>,
    /// Opaque key/value bag; round-tripped, never interpreted
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Source citations, in the order they were attached
    pub sources: Vec<Source>,
}

/// A citation attached to an assistant message
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub message_id: String,
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub domain: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for a source created alongside its parent message
#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub domain: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewSource {
    /// Resolve the citation domain, deriving it from the URL when absent
    fn resolved_domain(&self) -> Option<String> {
        self.domain.clone().or_else(|| {
            url::Url::parse(&self.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        })
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    /// Create a new conversation repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new thread
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create_thread(&self, user_id: &str, title: &str) -> Result<Thread> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        conn.execute(
            "INSERT INTO threads (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            [&id, user_id, title, &now_str],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Thread {
            id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a thread by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT id, user_id, title, created_at, updated_at FROM threads WHERE id = ?1",
            [thread_id],
            |row| {
                Ok(Thread {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    title: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    updated_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        );

        match result {
            Ok(thread) => Ok(Some(thread)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a thread is owned by the given user.
    ///
    /// A missing thread counts as not-owned; callers distinguish the two
    /// only if they need to (the HTTP surface deliberately does not).
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn is_owned_by(&self, thread_id: &str, user_id: &str) -> Result<bool> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM threads WHERE id = ?1 AND user_id = ?2",
                [thread_id, user_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(count > 0)
    }

    /// Append a message and its sources atomically.
    ///
    /// The message and all of its source rows are written in one
    /// transaction; on any failure nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn append_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        thinking_trace: Option<&serde_json::Value>,
        metadata: Option<&serde_json::Value>,
        sources: &[NewSource],
    ) -> Result<Message> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let thinking_json = thinking_trace.map(serde_json::Value::to_string);
        let metadata_json = metadata.map(serde_json::Value::to_string);

        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO messages (id, thread_id, role, content, thinking_trace, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                thread_id,
                role.as_str(),
                content,
                thinking_json,
                metadata_json,
                &now_str
            ],
        )?;

        let mut persisted_sources = Vec::with_capacity(sources.len());
        for source in sources {
            let source_id = Uuid::new_v4().to_string();
            let domain = source.resolved_domain();
            let source_meta = source.metadata.as_ref().map(serde_json::Value::to_string);

            tx.execute(
                "INSERT INTO sources (id, message_id, url, title, snippet, domain, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    &source_id,
                    &id,
                    &source.url,
                    &source.title,
                    &source.snippet,
                    &domain,
                    source_meta,
                    &now_str
                ],
            )?;

            persisted_sources.push(Source {
                id: source_id,
                message_id: id.clone(),
                url: source.url.clone(),
                title: source.title.clone(),
                snippet: source.snippet.clone(),
                domain,
                metadata: source.metadata.clone(),
            });
        }

        tx.commit()?;

        Ok(Message {
            id,
            thread_id: thread_id.to_string(),
            role,
            content: content.to_string(),
            thinking_trace: thinking_trace.cloned(),
            metadata: metadata.cloned(),
            created_at: now,
            sources: persisted_sources,
        })
    }

    /// Get the most recent messages for a thread, oldest first.
    ///
    /// Ordered by the append sequence, so the result is stable even when
    /// two turns were persisted in the same instant.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_recent_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, thread_id, role, content, thinking_trace, metadata, created_at
                 FROM messages WHERE thread_id = ?1
                 ORDER BY seq DESC LIMIT ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)]
        let mut messages: Vec<Message> = stmt
            .query_map(rusqlite::params![thread_id, limit as i64], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    thread_id: row.get(1)?,
                    role: MessageRole::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or(MessageRole::User),
                    content: row.get(3)?,
                    thinking_trace: parse_json(row.get::<_, Option<String>>(4)?),
                    metadata: parse_json(row.get::<_, Option<String>>(5)?),
                    created_at: parse_datetime(&row.get::<_, String>(6)?),
                    sources: Vec::new(),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let mut source_stmt = conn
            .prepare(
                "SELECT id, message_id, url, title, snippet, domain, metadata
                 FROM sources WHERE message_id = ?1 ORDER BY rowid",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        for message in &mut messages {
            message.sources = source_stmt
                .query_map([&message.id], |row| {
                    Ok(Source {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        url: row.get(2)?,
                        title: row.get(3)?,
                        snippet: row.get(4)?,
                        domain: row.get(5)?,
                        metadata: parse_json(row.get::<_, Option<String>>(6)?),
                    })
                })
                .map_err(|e| Error::Database(e.to_string()))?
                .filter_map(std::result::Result::ok)
                .collect();
        }

        Ok(messages)
    }

    /// Advance the thread's `updated_at` to now.
    ///
    /// Called exactly once per completed turn, success or failure, to keep
    /// recency ordering in thread listings honest.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn touch_thread(&self, thread_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            [&Utc::now().to_rfc3339(), thread_id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_json(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|text| serde_json::from_str(&text).ok())
}

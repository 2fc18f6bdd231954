//! libSQL-backed history store.
//!
//! Holds the direct message archive, the room transcript log, the room
//! directory and server properties. The handler only reads; the insert helpers
//! exist for provisioning and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{
    ArchiveQuery, ArchiveStore, DomainProperties, RoomDirectory, StoreError, UpperBound,
    DOMAIN_PROPERTY,
};
use crate::types::{Address, ArchivedMessage, RoomScope, TranscriptEntry};

/// SQL schema for the history store. Timestamps are epoch milliseconds.
pub const HISTORY_SCHEMA: &str = r#"
-- Server properties (xmpp.domain, ...)
CREATE TABLE IF NOT EXISTS server_properties (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- MUC services, keyed by subdomain (e.g. 'conference')
CREATE TABLE IF NOT EXISTS muc_services (
    service_id INTEGER PRIMARY KEY,
    subdomain TEXT NOT NULL UNIQUE
);

-- MUC rooms and the time their current incarnation was created
CREATE TABLE IF NOT EXISTS muc_rooms (
    room_id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(service_id, name),
    FOREIGN KEY (service_id) REFERENCES muc_services(service_id)
);

-- One-to-one message archive
CREATE TABLE IF NOT EXISTS message_archive (
    message_id INTEGER PRIMARY KEY,
    from_jid TEXT NOT NULL,
    from_resource TEXT,
    to_jid TEXT NOT NULL,
    to_resource TEXT,
    sent_at INTEGER NOT NULL,
    body TEXT
);

CREATE INDEX IF NOT EXISTS idx_message_archive_conversation
    ON message_archive(from_jid, to_jid, sent_at DESC);

-- Room transcript log, kept even after a room is destroyed
CREATE TABLE IF NOT EXISTS muc_conversation_log (
    entry_id INTEGER PRIMARY KEY,
    room_id INTEGER NOT NULL,
    sender TEXT NOT NULL,
    nickname TEXT,
    logged_at INTEGER NOT NULL,
    body TEXT,
    stanza TEXT
);

CREATE INDEX IF NOT EXISTS idx_muc_conversation_log_room
    ON muc_conversation_log(room_id, logged_at DESC);
"#;

const DIRECT_LATEST_SQL: &str = r#"
SELECT message_id, from_jid, from_resource, to_jid, to_resource, sent_at, body
FROM message_archive
WHERE ((from_jid = ?1 AND to_jid = ?2) OR (from_jid = ?2 AND to_jid = ?1))
ORDER BY sent_at DESC, message_id DESC
LIMIT ?3
"#;

const DIRECT_BEFORE_SQL: &str = r#"
SELECT message_id, from_jid, from_resource, to_jid, to_resource, sent_at, body
FROM message_archive
WHERE ((from_jid = ?1 AND to_jid = ?2) OR (from_jid = ?2 AND to_jid = ?1))
  AND sent_at < ?3
ORDER BY sent_at DESC, message_id DESC
LIMIT ?4
"#;

const DIRECT_BEFORE_ID_SQL: &str = r#"
SELECT message_id, from_jid, from_resource, to_jid, to_resource, sent_at, body
FROM message_archive
WHERE ((from_jid = ?1 AND to_jid = ?2) OR (from_jid = ?2 AND to_jid = ?1))
  AND message_id < ?3
ORDER BY sent_at DESC, message_id DESC
LIMIT ?4
"#;

const GROUP_LATEST_SQL: &str = r#"
SELECT sender, nickname, logged_at, body, stanza
FROM muc_conversation_log
WHERE room_id = ?1 AND logged_at > ?2 AND nickname IS NOT NULL
ORDER BY logged_at DESC, entry_id DESC
LIMIT ?3
"#;

const GROUP_BEFORE_SQL: &str = r#"
SELECT sender, nickname, logged_at, body, stanza
FROM muc_conversation_log
WHERE room_id = ?1 AND logged_at > ?2 AND nickname IS NOT NULL
  AND logged_at < ?3
ORDER BY logged_at DESC, entry_id DESC
LIMIT ?4
"#;

const ROOM_LOOKUP_SQL: &str = r#"
SELECT r.room_id, r.created_at
FROM muc_rooms r
JOIN muc_services s ON r.service_id = s.service_id
WHERE s.subdomain = ?1 AND r.name = ?2
"#;

const PROPERTY_SQL: &str = "SELECT value FROM server_properties WHERE name = ?1";

/// libSQL-based history store.
#[derive(Clone)]
pub struct LibSqlHistoryStore {
    /// Database connection.
    /// For in-memory databases, this must be a persistent connection.
    conn: Arc<Mutex<Connection>>,
    /// Whether the schema has been initialized.
    initialized: Arc<AtomicBool>,
}

impl LibSqlHistoryStore {
    /// Create a new store over the given connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create from a connection shared with other components.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create the schema if not already done.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), StoreError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        conn.execute_batch(HISTORY_SCHEMA).await?;

        self.initialized.store(true, Ordering::Release);
        debug!("History store schema initialized");

        Ok(())
    }

    /// Set the server's XMPP domain.
    #[instrument(skip(self))]
    pub async fn set_domain(&self, domain: &str) -> Result<(), StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO server_properties (name, value) VALUES (?1, ?2)",
            libsql::params![DOMAIN_PROPERTY, domain],
        )
        .await?;
        Ok(())
    }

    /// Create a room, replacing any earlier room of the same name.
    ///
    /// A replaced room gets a new id and creation time, the way a destroyed
    /// and recreated room does.
    #[instrument(skip(self))]
    pub async fn insert_room(
        &self,
        scope: &str,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<RoomScope, StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT OR IGNORE INTO muc_services (subdomain) VALUES (?1)",
            libsql::params![scope],
        )
        .await?;

        let mut rows = conn
            .query(
                "SELECT service_id FROM muc_services WHERE subdomain = ?1",
                libsql::params![scope],
            )
            .await?;
        let service_id: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => {
                return Err(StoreError::Database(format!(
                    "MUC service '{}' missing after insert",
                    scope
                )))
            }
        };

        conn.execute(
            "INSERT OR REPLACE INTO muc_rooms (service_id, name, created_at) VALUES (?1, ?2, ?3)",
            libsql::params![service_id, name, created_at.timestamp_millis()],
        )
        .await?;
        let room_id = conn.last_insert_rowid();

        debug!(room_id, "Room stored");

        Ok(RoomScope {
            room_id,
            created_at,
        })
    }

    /// Archive a direct message. Returns its sequence id.
    #[instrument(skip(self, message))]
    pub async fn insert_direct_message(&self, message: &ArchivedMessage) -> Result<i64, StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            INSERT INTO message_archive (
                message_id, from_jid, from_resource, to_jid, to_resource, sent_at, body
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            libsql::params![
                message.sequence_id,
                message.from.bare.clone(),
                message.from.resource.clone(),
                message.to.bare.clone(),
                message.to.resource.clone(),
                message.timestamp.timestamp_millis(),
                message.body.clone()
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    /// Append an entry to a room's transcript log.
    #[instrument(skip(self, entry), fields(room_id = entry.room_id))]
    pub async fn insert_transcript_entry(&self, entry: &TranscriptEntry) -> Result<(), StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            INSERT INTO muc_conversation_log (room_id, sender, nickname, logged_at, body, stanza)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            libsql::params![
                entry.room_id,
                entry.sender.clone(),
                entry.nickname.clone(),
                entry.logged_at.timestamp_millis(),
                entry.body.clone(),
                entry.stanza.clone()
            ],
        )
        .await?;

        Ok(())
    }
}

/// SQLite treats a negative limit as "no limit".
fn sql_limit(limit: Option<u64>) -> i64 {
    limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Decode(format!("timestamp out of range: {}", millis)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn direct_row_to_message(row: &libsql::Row) -> Result<ArchivedMessage, StoreError> {
    let sequence_id: i64 = row.get(0)?;
    let from_jid: String = row.get(1)?;
    let from_resource: Option<String> = row.get(2).ok();
    let to_jid: String = row.get(3)?;
    let to_resource: Option<String> = row.get(4).ok();
    let sent_at: i64 = row.get(5)?;
    let body: String = row.get(6).unwrap_or_default();

    Ok(ArchivedMessage {
        sequence_id: Some(sequence_id),
        from: Address {
            bare: from_jid,
            resource: non_empty(from_resource),
        },
        to: Address {
            bare: to_jid,
            resource: non_empty(to_resource),
        },
        timestamp: millis_to_datetime(sent_at)?,
        body,
        ..Default::default()
    })
}

fn group_row_to_message(row: &libsql::Row, room_jid: &str) -> Result<ArchivedMessage, StoreError> {
    let sender: String = row.get(0)?;
    let nickname: Option<String> = row.get(1).ok();
    let logged_at: i64 = row.get(2)?;
    let body: String = row.get(3).unwrap_or_default();
    let stanza: Option<String> = row.get(4).ok();

    Ok(ArchivedMessage {
        from: Address::bare(sender),
        to: Address {
            bare: room_jid.to_string(),
            resource: non_empty(nickname),
        },
        timestamp: millis_to_datetime(logged_at)?,
        body,
        stanza,
        ..Default::default()
    })
}

#[async_trait]
impl ArchiveStore for LibSqlHistoryStore {
    #[instrument(skip(self))]
    async fn fetch(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedMessage>, StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;

        let mut messages = Vec::new();

        match query {
            ArchiveQuery::Direct {
                requester,
                with,
                bound,
                limit,
            } => {
                let limit = sql_limit(*limit);
                let mut rows = match bound {
                    UpperBound::Latest => {
                        conn.query(
                            DIRECT_LATEST_SQL,
                            libsql::params![requester.as_str(), with.as_str(), limit],
                        )
                        .await?
                    }
                    UpperBound::Before(before) => {
                        conn.query(
                            DIRECT_BEFORE_SQL,
                            libsql::params![
                                requester.as_str(),
                                with.as_str(),
                                before.timestamp_millis(),
                                limit
                            ],
                        )
                        .await?
                    }
                    UpperBound::BeforeId(before_id) => {
                        conn.query(
                            DIRECT_BEFORE_ID_SQL,
                            libsql::params![requester.as_str(), with.as_str(), *before_id, limit],
                        )
                        .await?
                    }
                };

                while let Some(row) = rows.next().await? {
                    messages.push(direct_row_to_message(&row)?);
                }
            }
            ArchiveQuery::Group {
                room_jid,
                room_id,
                since,
                before,
                limit,
            } => {
                let limit = sql_limit(*limit);
                let since = since.timestamp_millis();
                let mut rows = match before {
                    None => {
                        conn.query(GROUP_LATEST_SQL, libsql::params![*room_id, since, limit])
                            .await?
                    }
                    Some(before) => {
                        conn.query(
                            GROUP_BEFORE_SQL,
                            libsql::params![*room_id, since, before.timestamp_millis(), limit],
                        )
                        .await?
                    }
                };

                while let Some(row) = rows.next().await? {
                    messages.push(group_row_to_message(&row, room_jid)?);
                }
            }
        }

        debug!(rows = messages.len(), "Archive query executed");

        Ok(messages)
    }
}

#[async_trait]
impl RoomDirectory for LibSqlHistoryStore {
    #[instrument(skip(self))]
    async fn lookup_room(&self, scope: &str, name: &str) -> Result<Option<RoomScope>, StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(ROOM_LOOKUP_SQL, libsql::params![scope, name])
            .await?;

        match rows.next().await? {
            Some(row) => {
                let room_id: i64 = row.get(0)?;
                let created_at: i64 = row.get(1)?;
                Ok(Some(RoomScope {
                    room_id,
                    created_at: millis_to_datetime(created_at)?,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DomainProperties for LibSqlHistoryStore {
    #[instrument(skip(self))]
    async fn lookup_domain(&self) -> Result<Option<String>, StoreError> {
        self.initialize().await?;
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(PROPERTY_SQL, libsql::params![DOMAIN_PROPERTY])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }
}

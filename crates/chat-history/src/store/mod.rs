//! Read-only store interfaces used by the history handler.
//!
//! The handler talks to three collaborators owned by the host server:
//!
//! - [`ArchiveStore`]: the direct message archive and the room transcript log
//! - [`RoomDirectory`]: room id and creation time lookup
//! - [`DomainProperties`]: the server's configured XMPP domain
//!
//! Queries are expressed as [`ArchiveQuery`] values. Each variant maps onto a
//! fixed, parameterized statement in the backing store; request data is only
//! ever bound as a parameter.

mod libsql_store;
mod memory;

pub use libsql_store::{LibSqlHistoryStore, HISTORY_SCHEMA};
pub use memory::MemoryHistoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ArchivedMessage, RoomScope};

/// Property holding the server's XMPP domain.
pub const DOMAIN_PROPERTY: &str = "xmpp.domain";

/// Errors raised by store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Exclusive upper bound of a direct message page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpperBound {
    /// Newest messages
    Latest,
    /// Messages sent strictly before the timestamp
    Before(DateTime<Utc>),
    /// Messages with a sequence id strictly below the given one
    BeforeId(i64),
}

/// A scoped archive query.
///
/// Rows are always returned newest first. `limit` is the number of rows to
/// fetch, `None` meaning all matching rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveQuery {
    /// Messages exchanged between two bare JIDs, in either direction.
    Direct {
        requester: String,
        with: String,
        bound: UpperBound,
        limit: Option<u64>,
    },
    /// Transcript entries of one room logged after the room was created.
    Group {
        /// Room bare JID, used as the recipient of returned messages
        room_jid: String,
        room_id: i64,
        since: DateTime<Utc>,
        before: Option<DateTime<Utc>>,
        limit: Option<u64>,
    },
}

/// Direct message archive and room transcript log.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Execute a query and return the matching rows, newest first.
    async fn fetch(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedMessage>, StoreError>;
}

/// Room lookup by MUC service subdomain and room name.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Resolve a room, `None` if no such room exists.
    async fn lookup_room(&self, scope: &str, name: &str) -> Result<Option<RoomScope>, StoreError>;
}

/// Server property lookup.
#[async_trait]
pub trait DomainProperties: Send + Sync {
    /// The configured XMPP domain, `None` if not set.
    async fn lookup_domain(&self) -> Result<Option<String>, StoreError>;
}

/// Everything the history handler needs from the host.
pub trait HistoryBackend: ArchiveStore + RoomDirectory + DomainProperties {}

impl<T> HistoryBackend for T where T: ArchiveStore + RoomDirectory + DomainProperties {}

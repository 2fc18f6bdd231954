//! In-memory history store.
//!
//! Evaluates [`ArchiveQuery`] the same way the libSQL statements do. Used to
//! test the handler without a database, and to count how often the store was
//! reached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{
    ArchiveQuery, ArchiveStore, DomainProperties, RoomDirectory, StoreError, UpperBound,
};
use crate::types::{Address, ArchivedMessage, RoomScope, TranscriptEntry};

#[derive(Default)]
struct MemoryState {
    domain: Option<String>,
    rooms: Vec<(String, String, RoomScope)>,
    direct: Vec<ArchivedMessage>,
    transcript: Vec<TranscriptEntry>,
    failure: Option<String>,
    next_id: i64,
}

/// History store kept entirely in memory.
#[derive(Default)]
pub struct MemoryHistoryStore {
    state: RwLock<MemoryState>,
    calls: AtomicUsize,
}

impl MemoryHistoryStore {
    /// Create an empty store with no domain configured.
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(reason) = &state.failure {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        Ok(state)
    }

    /// Set the server's XMPP domain.
    pub fn set_domain(&self, domain: impl Into<String>) {
        self.write().domain = Some(domain.into());
    }

    /// Create a room, replacing any earlier room of the same name.
    pub fn insert_room(&self, scope: &str, name: &str, created_at: DateTime<Utc>) -> RoomScope {
        let mut state = self.write();
        state.next_id += 1;
        let room = RoomScope {
            room_id: state.next_id,
            created_at,
        };
        state.rooms.retain(|(s, n, _)| s != scope || n != name);
        state.rooms.push((scope.to_string(), name.to_string(), room));
        room
    }

    /// Archive a direct message. Returns its sequence id.
    pub fn insert_direct_message(&self, message: ArchivedMessage) -> i64 {
        let mut state = self.write();
        let id = match message.sequence_id {
            Some(id) => id,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        state.direct.push(ArchivedMessage {
            sequence_id: Some(id),
            ..message
        });
        id
    }

    /// Append an entry to a room's transcript log.
    pub fn insert_transcript_entry(&self, entry: TranscriptEntry) {
        self.write().transcript.push(entry);
    }

    /// Make every subsequent read fail.
    pub fn fail_with(&self, reason: impl Into<String>) {
        self.write().failure = Some(reason.into());
    }

    /// Number of reads (fetches and lookups) performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn take_limit<T>(rows: Vec<T>, limit: Option<u64>) -> Vec<T> {
    match limit {
        Some(limit) => rows
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect(),
        None => rows,
    }
}

#[async_trait]
impl ArchiveStore for MemoryHistoryStore {
    async fn fetch(&self, query: &ArchiveQuery) -> Result<Vec<ArchivedMessage>, StoreError> {
        let state = self.read()?;

        match query {
            ArchiveQuery::Direct {
                requester,
                with,
                bound,
                limit,
            } => {
                let mut rows: Vec<ArchivedMessage> = state
                    .direct
                    .iter()
                    .filter(|m| {
                        (m.from.bare == *requester && m.to.bare == *with)
                            || (m.from.bare == *with && m.to.bare == *requester)
                    })
                    .filter(|m| match bound {
                        UpperBound::Latest => true,
                        UpperBound::Before(before) => m.timestamp < *before,
                        UpperBound::BeforeId(id) => m.sequence_id.is_some_and(|s| s < *id),
                    })
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| {
                    b.timestamp
                        .cmp(&a.timestamp)
                        .then_with(|| b.sequence_id.cmp(&a.sequence_id))
                });
                Ok(take_limit(rows, *limit))
            }
            ArchiveQuery::Group {
                room_jid,
                room_id,
                since,
                before,
                limit,
            } => {
                let mut entries: Vec<(usize, &TranscriptEntry)> = state
                    .transcript
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.room_id == *room_id && e.logged_at > *since)
                    .filter(|(_, e)| e.nickname.is_some())
                    .filter(|(_, e)| before.map_or(true, |b| e.logged_at < b))
                    .collect();
                entries.sort_by(|(ia, a), (ib, b)| {
                    b.logged_at.cmp(&a.logged_at).then_with(|| ib.cmp(ia))
                });

                let rows = entries
                    .into_iter()
                    .map(|(_, e)| ArchivedMessage {
                        from: Address::bare(e.sender.clone()),
                        to: Address {
                            bare: room_jid.clone(),
                            resource: e.nickname.clone().filter(|n| !n.is_empty()),
                        },
                        timestamp: e.logged_at,
                        body: e.body.clone(),
                        stanza: e.stanza.clone(),
                        ..Default::default()
                    })
                    .collect();
                Ok(take_limit(rows, *limit))
            }
        }
    }
}

#[async_trait]
impl RoomDirectory for MemoryHistoryStore {
    async fn lookup_room(&self, scope: &str, name: &str) -> Result<Option<RoomScope>, StoreError> {
        let state = self.read()?;
        Ok(state
            .rooms
            .iter()
            .find(|(s, n, _)| s == scope && n == name)
            .map(|(_, _, room)| *room))
    }
}

#[async_trait]
impl DomainProperties for MemoryHistoryStore {
    async fn lookup_domain(&self) -> Result<Option<String>, StoreError> {
        let state = self.read()?;
        Ok(state.domain.clone())
    }
}

//! # chat-history
//!
//! Chat history IQ handler for XMPP servers.
//!
//! Answers `otavanopisto:chat:history` queries: a client asks for a page of
//! past messages with one peer (`chat`) or from one room (`groupchat`), and
//! receives them oldest first together with a flag telling whether older
//! messages exist.
//!
//! ## Architecture
//!
//! - **Query**: parsing and validation of the request element
//! - **Planner**: scoping a request to a fixed, parameterized archive query
//! - **Store**: read-only archive traits, a libSQL implementation and an
//!   in-memory one
//! - **Stanza**: extraction of stanza ids and body attributes from archived
//!   group chat stanzas
//! - **Assembler**: result, empty and error IQs
//! - **Handler**: the request pipeline, logging and metrics
//!
//! ## Variants
//!
//! The handler runs in one of two [`HistoryVariant`]s. `sequence-ids` exposes
//! the archive sequence id of direct messages and accepts `before-id` paging;
//! `stanza-ids` lets group chat clients ask for the stanza ids of messages.

pub mod assembler;
pub mod handler;
pub mod metrics;
pub mod planner;
pub mod query;
pub mod stanza;
pub mod store;

mod error;
mod types;

pub use assembler::{full_jid, ResultPage};
pub use error::{
    HistoryError, StanzaErrorCondition, StanzaErrorType, FETCH_FAILED_TEXT,
};
pub use handler::ChatHistoryHandler;
pub use query::{is_history_query, NS_CHAT_HISTORY};
pub use stanza::{ExtractedFields, StanzaParseError};
pub use store::{
    ArchiveQuery, ArchiveStore, DomainProperties, HistoryBackend, LibSqlHistoryStore,
    MemoryHistoryStore, RoomDirectory, StoreError, UpperBound,
};
pub use types::*;

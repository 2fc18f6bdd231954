//! Common types for chat history queries.

use chrono::{DateTime, Utc};
use jid::BareJid;
use serde::{Deserialize, Serialize};

/// Which archive a query reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    /// One-to-one conversation, read from the direct message archive
    Direct,
    /// Multi-user chat room, read from the room transcript log
    Group,
}

impl ConversationMode {
    /// Parse the `type` element of a query. Only exact literals are accepted.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Self::Direct),
            "groupchat" => Some(Self::Group),
            _ => None,
        }
    }

    /// Wire literal for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "chat",
            Self::Group => "groupchat",
        }
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handler capability selecting how history pages are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryVariant {
    /// Direct messages carry their archive sequence id and accept `before-id`.
    /// `includeStanzaIds` is rejected.
    SequenceIds,
    /// Group messages may carry their stanza-id and body attributes.
    /// `before-id` is ignored.
    #[default]
    StanzaIds,
}

impl std::fmt::Display for HistoryVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryVariant::SequenceIds => write!(f, "sequence-ids"),
            HistoryVariant::StanzaIds => write!(f, "stanza-ids"),
        }
    }
}

/// Handler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Pagination capability exposed to clients
    pub variant: HistoryVariant,
    /// Upper limit applied to every page (0 = no limit)
    pub max_page_size: u64,
}

impl HistoryConfig {
    /// Page size actually used for a request.
    ///
    /// A configured cap replaces an unbounded request and clamps larger ones.
    pub fn effective_max(&self, requested: Option<u64>) -> Option<u64> {
        match (requested, self.max_page_size) {
            (requested, 0) => requested,
            (None, cap) => Some(cap),
            (Some(max), cap) => Some(max.min(cap)),
        }
    }
}

/// Parsed chat history query.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// Authenticated requester
    pub requester: BareJid,
    /// Direct or group conversation
    pub mode: ConversationMode,
    /// Conversation partner (peer bare JID or room bare JID)
    pub with: String,
    /// Page size, `None` for unbounded
    pub max: Option<u64>,
    /// Exclusive upper timestamp bound
    pub before: Option<DateTime<Utc>>,
    /// Exclusive upper sequence id bound (direct mode only)
    pub before_id: Option<i64>,
    /// Whether group messages should carry stanza ids and body attributes
    pub include_stanza_ids: bool,
    /// Client supplied query id, echoed in the response
    pub query_id: Option<String>,
}

/// A JID split into its bare part and optional resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Bare JID (or any address string the archive stored)
    pub bare: String,
    /// Resource or room nickname
    pub resource: Option<String>,
}

impl Address {
    /// Address without a resource.
    pub fn bare(bare: impl Into<String>) -> Self {
        Self {
            bare: bare.into(),
            resource: None,
        }
    }

    /// Address with a resource.
    pub fn with_resource(bare: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            bare: bare.into(),
            resource: Some(resource.into()),
        }
    }

    /// Full JID string.
    pub fn full(&self) -> String {
        crate::assembler::full_jid(&self.bare, self.resource.as_deref())
    }
}

/// A message read from one of the archives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchivedMessage {
    /// Archive sequence id (direct archive only)
    pub sequence_id: Option<i64>,
    /// Sender
    pub from: Address,
    /// Recipient (room JID plus nickname for group messages)
    pub to: Address,
    /// When the message was sent or logged
    pub timestamp: DateTime<Utc>,
    /// Message body
    pub body: String,
    /// Raw archived stanza (group transcript only)
    pub stanza: Option<String>,
    /// Stable id taken from the archived stanza
    pub stanza_id: Option<String>,
    /// Attributes of the archived stanza's body element, in document order
    pub body_attributes: Vec<(String, String)>,
}

/// Resolved group chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomScope {
    /// Room identifier in the transcript log
    pub room_id: i64,
    /// When the current incarnation of the room was created
    pub created_at: DateTime<Utc>,
}

/// An entry of the group transcript log.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    /// Room the entry was logged in
    pub room_id: i64,
    /// Sender JID as logged
    pub sender: String,
    /// Room nickname; entries without one are not part of the history
    pub nickname: Option<String>,
    /// When the entry was logged
    pub logged_at: DateTime<Utc>,
    /// Message body
    pub body: String,
    /// Raw archived stanza
    pub stanza: Option<String>,
}

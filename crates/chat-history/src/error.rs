//! Error types for the chat history handler.

use thiserror::Error;

use crate::stanza::StanzaParseError;
use crate::store::StoreError;

/// Text returned to the requester when the archive cannot be read.
///
/// Store failures are logged in full but never echoed to the caller.
pub const FETCH_FAILED_TEXT: &str = "Error fetching messages";

/// Errors raised while answering a chat history query.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The query was malformed or asked for an unsupported combination
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The archive, room directory or property store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An archived group chat stanza could not be parsed
    #[error("Unable to parse message stanza: {0}")]
    StanzaParse(#[from] StanzaParseError),
}

impl HistoryError {
    /// Create a new bad request error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// The stanza error condition reported to the requester.
    pub fn condition(&self) -> StanzaErrorCondition {
        match self {
            Self::BadRequest(_) => StanzaErrorCondition::BadRequest,
            Self::Store(_) | Self::StanzaParse(_) => StanzaErrorCondition::InternalServerError,
        }
    }

    /// The stanza error type reported to the requester.
    pub fn error_type(&self) -> StanzaErrorType {
        match self.condition() {
            StanzaErrorCondition::BadRequest => StanzaErrorType::Modify,
            StanzaErrorCondition::InternalServerError => StanzaErrorType::Wait,
        }
    }

    /// Human readable text placed in the error response.
    pub fn client_text(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Store(_) => FETCH_FAILED_TEXT.to_string(),
            Self::StanzaParse(e) => format!("Unable to parse message stanza: {}", e),
        }
    }
}

/// Stanza error conditions used by the handler (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    /// Bad request (invalid mode, misplaced flag, malformed parameter)
    BadRequest,
    /// Internal server error (store or archived stanza failure)
    InternalServerError,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::InternalServerError => "internal-server-error",
        }
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Chat history query parsing.
//!
//! Expected format:
//! ```xml
//! <iq type='get' id='hist1'>
//!   <query xmlns='otavanopisto:chat:history' queryId='q7'>
//!     <type>chat</type>
//!     <with>juliet@capulet.lit</with>
//!     <max>50</max>
//!     <before>2024-01-15T10:30:00.000Z</before>
//!   </query>
//! </iq>
//! ```
//!
//! Group chat queries use `<type>groupchat</type>` with the room JID in
//! `<with/>`, and may add `<includeStanzaIds/>`. Direct queries may page with
//! `<before-id/>` instead of `<before/>`.

use chrono::{DateTime, Utc};
use jid::BareJid;
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use crate::error::HistoryError;
use crate::types::{ConversationMode, HistoryQuery};

/// Chat history namespace.
pub const NS_CHAT_HISTORY: &str = "otavanopisto:chat:history";

/// Element name of the query payload.
pub const QUERY_ELEMENT: &str = "query";

/// Check if an IQ is a chat history query.
pub fn is_history_query(iq: &Iq) -> bool {
    query_element(iq).is_some()
}

/// The chat history query payload of an IQ, if it carries one.
pub fn query_element(iq: &Iq) -> Option<&Element> {
    match &iq.payload {
        IqType::Get(elem) | IqType::Set(elem) => {
            (elem.name() == QUERY_ELEMENT && elem.ns() == NS_CHAT_HISTORY).then_some(elem)
        }
        _ => None,
    }
}

/// Text of the first child element with the given name.
fn child_text(query: &Element, name: &str) -> Option<String> {
    query
        .children()
        .find(|c| c.name() == name)
        .map(|c| c.text().trim().to_string())
}

fn has_child(query: &Element, name: &str) -> bool {
    query.children().any(|c| c.name() == name)
}

/// Parse a chat history query element.
///
/// Validation happens in a fixed order: the `includeStanzaIds` flag is
/// checked against the raw `type` first, then the `type` literal itself, then
/// the remaining parameters.
pub fn parse_history_query(requester: &BareJid, query: &Element) -> Result<HistoryQuery, HistoryError> {
    let mode_text = child_text(query, "type").unwrap_or_default();
    let include_stanza_ids = has_child(query, "includeStanzaIds");

    if include_stanza_ids && mode_text != ConversationMode::Group.as_str() {
        return Err(HistoryError::bad_request(format!(
            "includeStanzaIds is only valid with type groupchat, was {}",
            mode_text
        )));
    }

    let mode = ConversationMode::from_wire(&mode_text).ok_or_else(|| {
        HistoryError::bad_request(format!("type needs to be chat|groupchat, was {}", mode_text))
    })?;

    let with = child_text(query, "with")
        .filter(|w| !w.is_empty())
        .ok_or_else(|| HistoryError::bad_request("with is required"))?;

    let max = match child_text(query, "max") {
        Some(text) if !text.is_empty() => parse_positive(&text, "max")?,
        _ => None,
    };

    let before = match child_text(query, "before") {
        Some(text) if !text.is_empty() => {
            Some(parse_datetime(&text)?).filter(|dt| dt.timestamp_millis() > 0)
        }
        _ => None,
    };

    let before_id = match child_text(query, "before-id") {
        Some(text) if !text.is_empty() => parse_positive(&text, "before-id")?,
        _ => None,
    }
    .map(|id| id as i64);

    let query_id = query
        .attr("queryId")
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string());

    let parsed = HistoryQuery {
        requester: requester.clone(),
        mode,
        with,
        max,
        before,
        before_id,
        include_stanza_ids,
        query_id,
    };

    debug!(query = ?parsed, "Parsed chat history query");

    Ok(parsed)
}

/// Parse an integer parameter. Zero and negative values mean "not set".
fn parse_positive(text: &str, name: &str) -> Result<Option<u64>, HistoryError> {
    let value: i64 = text
        .parse()
        .map_err(|_| HistoryError::bad_request(format!("Invalid {}: {}", name, text)))?;
    Ok((value > 0).then_some(value as u64))
}

/// Parse an ISO 8601 / RFC 3339 datetime string.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, HistoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HistoryError::bad_request(format!("Invalid before: {}", e)))
}
